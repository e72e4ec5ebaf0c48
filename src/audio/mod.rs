pub mod device;
pub mod mixer;
pub mod stream;
pub mod sync;
pub mod tone;
