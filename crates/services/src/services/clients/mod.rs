pub mod internal_forge;
pub mod local_toolchain;
pub mod package_service;
pub mod review_forge;
