/// Options controlling fragment derivation.
#[derive(Debug, Clone)]
pub struct QueryProcessorOptions {
    /// Minimum connected-subgraph size a fragment may cover. Default `1`.
    pub min_component_size: usize,
    /// Enumerate every connected subgraph of the join graph instead of just
    /// the partition-key-anchored component.
    pub follow_graph: bool,
    /// Keep unary (single-alias) WHERE constraints in assembled fragments.
    /// When `false`, only the join-graph edge predicates connecting a
    /// fragment's tables are kept (a coarser, still-sound superset).
    pub keep_all_attributes: bool,
    /// If no fragment reaches the partition key: `true` returns an empty
    /// fragment list with a `tracing::warn!`, `false` returns
    /// [`crate::error::QueryProcessorError::NoPartitionKey`].
    pub warn_no_partition_key: bool,
    /// Declared geometry column backing a spatial partition key, if any.
    pub geometry_column: Option<String>,
    /// Drop equality joins of the form `a.<partition_key> = b.<partition_key>`
    /// from the join graph instead of fusing the two sides into one
    /// fragment — they convey no constraint beyond partition alignment.
    pub skip_partition_key_joins: bool,
    /// Unit (in the same scale as literal distance constants) that buffer
    /// distances are snapped up to the next power-of-two multiple of.
    pub distance_snap_unit: f64,
}

impl Default for QueryProcessorOptions {
    fn default() -> Self {
        Self {
            min_component_size: 1,
            follow_graph: false,
            keep_all_attributes: true,
            warn_no_partition_key: true,
            geometry_column: None,
            skip_partition_key_joins: false,
            distance_snap_unit: 1.0,
        }
    }
}
