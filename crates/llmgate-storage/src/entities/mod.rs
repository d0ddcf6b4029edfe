pub mod activity_events;
pub mod credit_transactions;
pub mod user_keys;
pub mod users;

pub use activity_events::Entity as ActivityEvents;
pub use credit_transactions::Entity as CreditTransactions;
pub use user_keys::Entity as UserKeys;
pub use users::Entity as Users;
