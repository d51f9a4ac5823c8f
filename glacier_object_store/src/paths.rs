use glacier_resources::PartitionName;

/// Object key of a snapshot inside its bucket.
pub fn format_snapshot_path(partition: &PartitionName, name: &str) -> String {
    format!("{}/{}", partition, name)
}

/// Prefix under which all snapshots of a partition live.
pub fn format_partition_prefix(partition: &PartitionName) -> String {
    format!("{}/", partition)
}

/// Returns the file name part of an object key.
pub fn snapshot_name_from_path(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_paths() {
        let partition = PartitionName::new_unchecked("daily");
        let path = format_snapshot_path(&partition, "glacier_20240101_001.parquet");
        assert_eq!(path, "daily/glacier_20240101_001.parquet");
        assert!(path.starts_with(&format_partition_prefix(&partition)));
        assert_eq!(
            snapshot_name_from_path(&path),
            "glacier_20240101_001.parquet"
        );
        assert_eq!(snapshot_name_from_path("plain.parquet"), "plain.parquet");
    }
}
