pub mod attempt;
pub mod candidate;
pub mod driver;
pub mod event;
pub mod order;
