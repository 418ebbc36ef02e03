pub mod paystack;
pub mod registry;
pub mod traits;

pub use paystack::PaystackProvider;
pub use registry::ProviderRegistry;
pub use traits::{
    AccountValidation, Bank, PaymentProvider, TransferRequest, TransferResponse, TransferStatus,
    TransferVerification,
};
