//! External service ports (payment, inventory) and their in-process adapters.

pub mod gateway;
pub mod inventory;

pub use gateway::{
    ChargeCall, FailingGateway, FakeGateway, FraudCheckGateway, GatewayError, PaymentGateway,
    RecordingGateway,
};
pub use inventory::{Inventory, StockedInventory, UnlimitedInventory};
