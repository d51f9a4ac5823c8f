use glacier_observability::Counter;

pub struct IngestionMetrics {
    pub ingested_rows: Counter<u64>,
    pub ingested_bytes: Counter<u64>,
    pub cutovers: Counter<u64>,
    pub snapshots: Counter<u64>,
    pub snapshot_bytes: Counter<u64>,
    pub materialization_failures: Counter<u64>,
    pub index_failures: Counter<u64>,
    pub spilled_buffers: Counter<u64>,
}

impl Default for IngestionMetrics {
    fn default() -> Self {
        let meter = glacier_observability::meter("ingestion");
        Self {
            ingested_rows: meter
                .u64_counter("glacier.ingest.rows")
                .with_unit("{row}")
                .with_description("rows appended to live buffers")
                .build(),
            ingested_bytes: meter
                .u64_counter("glacier.ingest.bytes")
                .with_unit("By")
                .with_description("estimated bytes appended to live buffers")
                .build(),
            cutovers: meter
                .u64_counter("glacier.buffer.cutovers")
                .with_description("number of buffers sealed")
                .build(),
            snapshots: meter
                .u64_counter("glacier.snapshot.count")
                .with_description("number of snapshots materialized")
                .build(),
            snapshot_bytes: meter
                .u64_counter("glacier.snapshot.bytes")
                .with_unit("By")
                .with_description("bytes of parquet written to object storage")
                .build(),
            materialization_failures: meter
                .u64_counter("glacier.snapshot.failures")
                .with_description("buffers that could not be materialized")
                .build(),
            index_failures: meter
                .u64_counter("glacier.index.failures")
                .with_description("snapshots whose index write failed")
                .build(),
            spilled_buffers: meter
                .u64_counter("glacier.spill.count")
                .with_description("buffers written to the local spill directory")
                .build(),
        }
    }
}
