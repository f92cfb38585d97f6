pub mod descriptor;
pub mod domain;
