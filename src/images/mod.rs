pub mod services;

pub use services::{upload_many, FileOutcome, UploadItem, UploadReport};
