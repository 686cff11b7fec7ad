pub mod service;

pub use service::CreditService;
