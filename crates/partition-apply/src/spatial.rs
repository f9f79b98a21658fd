//! Spatial variant of the apply-cache rewrite: when the partition key's
//! registry entry declares a geometry column, the intersected partition
//! set constrains `Q` through `ST_Intersects` against the union of the
//! matching partitions' geometries instead of a scalar `IN (...)` list.
//!
//! Grounded in the same two-stage shape as the scalar path — look up the
//! intersection, then splice a predicate — differing only in what
//! predicate gets spliced. Which table holds a partition's geometry is a
//! deployment detail outside this crate's scope; the convention here
//! (`<partition_key>_geometries(<partition_key>, geom)`) is documented in
//! DESIGN.md as the one assumption this path makes.

use partition_cache::{CacheBackend, LazyCacheBackend};
use partition_core::{generate_fragments, QueryProcessorOptions};
use partition_registry::PartitionMeta;

use crate::{rewrite, values_to_in_list, ApplyError, ApplyOutcome, LazyApplyOutcome};

fn geometries_table(partition_key: &str) -> String {
    format!("{}_geometries", partition_key.to_lowercase())
}

/// Materialized spatial rewrite. Requires `meta.geometry_column` to be set.
pub async fn apply_spatial(
    sql: &str,
    cache: &dyn CacheBackend,
    partition_key: &str,
    meta: &PartitionMeta,
    options: &QueryProcessorOptions,
) -> Result<ApplyOutcome, ApplyError> {
    let geometry_column = meta
        .geometry_column
        .as_deref()
        .ok_or(ApplyError::MissingGeometryColumn)?;

    let fragments = generate_fragments(sql, partition_key, options)?;
    let fragment_count = fragments.len();
    if fragment_count == 0 {
        return Ok(ApplyOutcome {
            rewritten_sql: sql.to_string(),
            hit_count: 0,
            fragment_count,
        });
    }

    let hashes: Vec<String> = fragments.into_iter().map(|f| f.hash).collect();
    let (intersected, hit_count) = cache.get_intersected(&hashes).await?;
    if hit_count == 0 {
        return Ok(ApplyOutcome {
            rewritten_sql: sql.to_string(),
            hit_count: 0,
            fragment_count,
        });
    }

    let predicate = match intersected {
        Some(value) if !value.is_empty() => {
            let members = values_to_in_list(&value);
            format!(
                "st_intersects({geom}, (select st_union(geom) from {table} where {key} in ({members})))",
                geom = geometry_column,
                table = geometries_table(partition_key),
                key = partition_key.to_lowercase(),
                members = members.join(", "),
            )
        }
        _ => "false".to_string(),
    };

    let rewritten_sql = rewrite::splice_predicate(sql, &predicate)?;
    Ok(ApplyOutcome {
        rewritten_sql,
        hit_count,
        fragment_count,
    })
}

/// Lazy spatial rewrite: the backend's native intersection expression
/// takes the place of the literal `IN (...)` list in the geometry union
/// subquery.
pub async fn apply_spatial_lazy(
    sql: &str,
    cache: &dyn LazyCacheBackend,
    partition_key: &str,
    meta: &PartitionMeta,
    options: &QueryProcessorOptions,
) -> Result<LazyApplyOutcome, ApplyError> {
    let geometry_column = meta
        .geometry_column
        .as_deref()
        .ok_or(ApplyError::MissingGeometryColumn)?;

    let fragments = generate_fragments(sql, partition_key, options)?;
    let fragment_count = fragments.len();
    if fragment_count == 0 {
        return Ok(LazyApplyOutcome {
            rewritten_sql: sql.to_string(),
            fragment_count,
        });
    }

    let hashes: Vec<String> = fragments.into_iter().map(|f| f.hash).collect();
    let expr = cache.get_intersected_sql(&hashes).await?;
    let predicate = format!(
        "st_intersects({geom}, (select st_union(geom) from {table} where {key} in {expr}))",
        geom = geometry_column,
        table = geometries_table(partition_key),
        key = partition_key.to_lowercase(),
        expr = expr,
    );
    let rewritten_sql = rewrite::splice_predicate(sql, &predicate)?;
    Ok(LazyApplyOutcome {
        rewritten_sql,
        fragment_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use partition_cache::backends::InMemorySetBackend;
    use partition_cache::CacheValue;
    use partition_registry::PartitionDatatype;
    use std::collections::BTreeSet;

    fn opts() -> QueryProcessorOptions {
        let mut o = QueryProcessorOptions::default();
        o.geometry_column = Some("geom".to_string());
        o
    }

    #[tokio::test]
    async fn spatial_rewrite_uses_st_intersects() {
        let cache = InMemorySetBackend::new();
        let sql = "select * from poi p where p.category = 'cafe'";
        let fragments = generate_fragments(sql, "region_id", &opts()).unwrap();
        cache
            .set_set(
                &fragments[0].hash,
                CacheValue::IntSet(BTreeSet::from([1, 2])),
            )
            .await
            .unwrap();

        let meta = PartitionMeta::new(PartitionDatatype::Integer).with_geometry_column("geom");
        let outcome = apply_spatial(sql, &cache, "region_id", &meta, &opts())
            .await
            .unwrap();
        assert!(outcome.rewritten_sql.to_lowercase().contains("st_intersects"));
        assert!(outcome.rewritten_sql.contains("region_id_geometries"));
    }

    #[tokio::test]
    async fn missing_geometry_column_errors() {
        let cache = InMemorySetBackend::new();
        let meta = PartitionMeta::new(PartitionDatatype::Integer);
        let err = apply_spatial("select * from poi", &cache, "region_id", &meta, &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::MissingGeometryColumn));
    }
}
