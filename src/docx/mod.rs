pub mod format;
pub mod model;
pub mod mutate;
pub mod package;
pub mod rpr;
pub mod styles;
pub mod tables;
pub mod xml;
