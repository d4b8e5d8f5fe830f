// # State Store Implementations
//
// This module provides implementations of the StateStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

#[cfg(test)]
pub(crate) mod tests {
    use crate::config::FailoverConfig;
    use crate::traits::{DnsRecordRef, ManagedRecords, RecordType, StateDocument};

    pub(crate) fn sample_document() -> StateDocument {
        let config = FailoverConfig {
            alias: "app.example.com".to_string(),
            primary_record: "primary.example.com".to_string(),
            backup_record: "backup.example.com".to_string(),
            primary_ip: "192.0.2.10".parse().unwrap(),
            backup_ip: "192.0.2.20".parse().unwrap(),
            check_interval_secs: 5,
            failure_threshold: 2,
            recovery_threshold: 3,
            ttl: 60,
        };
        let record = |name: &str, record_type, id: &str, content: &str| DnsRecordRef {
            name: name.to_string(),
            record_type,
            id: id.to_string(),
            content: content.to_string(),
        };
        let records = ManagedRecords {
            primary: record("primary.example.com", RecordType::A, "rec-1", "192.0.2.10"),
            backup: record("backup.example.com", RecordType::A, "rec-2", "192.0.2.20"),
            alias: record("app.example.com", RecordType::Cname, "rec-3", "primary.example.com"),
        };
        StateDocument::new(config, records, chrono::Utc::now())
    }
}
