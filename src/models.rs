pub mod catalog;
pub mod transactions;
pub mod users;
