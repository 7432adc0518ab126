//! Wire formats of the Bluetooth Glucose Profile.

pub mod glucose_measurement;
pub mod sfloat;

pub use glucose_measurement::decode;
pub use glucose_measurement::ConcentrationUnit;
pub use glucose_measurement::GlucoseMeasurement;
pub use sfloat::SFloat;
