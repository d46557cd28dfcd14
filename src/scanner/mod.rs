pub mod invoker;
pub mod parser;

pub use invoker::{run_scan, scanner_version, ScanCommand, ScanInvocation};
pub use parser::{parse_detections, parse_summary, Detection, ScanSummary};
