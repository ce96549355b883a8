//! Concrete entity adapters.

pub mod climate;
pub mod cover;
pub mod light;
pub mod sensor;

pub use climate::Climate;
pub use cover::Cover;
pub use light::{ColorMode, Light, LightKind, LightParams};
pub use sensor::{ActionSensor, Sensor, CLICK_EVENT};
