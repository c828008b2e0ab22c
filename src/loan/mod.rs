pub mod application;
pub mod liquidation;
pub mod model;
pub mod repayment;

pub use application::LoanApplicationService;
pub use liquidation::LiquidationService;
pub use model::*;
pub use repayment::LoanRepaymentService;
