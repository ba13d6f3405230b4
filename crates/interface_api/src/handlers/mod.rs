//! Request handlers, one module per resource

pub mod clients;
pub mod health;
pub mod invoices;
pub mod payments;
pub mod phone_numbers;
pub mod usage;
