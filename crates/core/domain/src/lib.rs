pub mod data;
pub mod point;

pub use data::{DataValue, Quality, RawValue, ValueData};
pub use point::{
    AccessMode, DataPoint, PointRegistry, RegisterKind, RegistryError, ValueFormat, WriteKind,
};
