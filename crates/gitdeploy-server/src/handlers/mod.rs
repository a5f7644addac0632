pub mod jobs;
pub mod local_report;
pub mod logs;
pub mod promote;
pub mod repos;
