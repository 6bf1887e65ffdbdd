pub mod home;
pub mod mapping;
pub mod streaming;

pub use home::HomeService;
pub use mapping::MappingService;
pub use streaming::StreamingService;
