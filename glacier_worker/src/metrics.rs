use glacier_observability::Counter;

pub struct CompactionMetrics {
    pub compactions: Counter<u64>,
    pub merged_snapshots: Counter<u64>,
    pub merged_rows: Counter<u64>,
    pub resumed_compactions: Counter<u64>,
    pub failures: Counter<u64>,
}

impl Default for CompactionMetrics {
    fn default() -> Self {
        let meter = glacier_observability::meter("compaction");
        Self {
            compactions: meter
                .u64_counter("glacier.compaction.count")
                .with_description("consolidated snapshots written")
                .build(),
            merged_snapshots: meter
                .u64_counter("glacier.compaction.inputs")
                .with_description("snapshots merged into consolidated snapshots")
                .build(),
            merged_rows: meter
                .u64_counter("glacier.compaction.rows")
                .with_unit("{row}")
                .with_description("rows written to consolidated snapshots")
                .build(),
            resumed_compactions: meter
                .u64_counter("glacier.compaction.resumed")
                .with_description("interrupted compactions finished on a later run")
                .build(),
            failures: meter
                .u64_counter("glacier.compaction.failures")
                .with_description("compaction runs that returned an error")
                .build(),
        }
    }
}
