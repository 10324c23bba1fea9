mod messenger;
mod periodic_driver;

pub use messenger::Messenger;
pub use periodic_driver::{
    DriverConfig,
    DriverHandle,
    PeriodicDriver,
};
