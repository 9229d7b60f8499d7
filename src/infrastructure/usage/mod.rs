pub mod sysinfo_reporter;
