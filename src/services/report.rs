//! Delimited and JSON outputs of a run, and statistics over cluster tables.

use crate::engine::filename::Domain;
use crate::engine::pipeline::{DomainCluster, DuplicateGroup, SkippedAsset};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use thiserror::Error;

/// Separator between domains inside one cluster table cell.
pub const DOMAIN_SEPARATOR: char = ';';

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed group table at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

#[derive(Serialize)]
struct ClusterRow<'a> {
    group_id: usize,
    domains: &'a str,
}

#[derive(Serialize)]
struct MappingRow<'a> {
    domain: &'a str,
    filename: &'a str,
}

#[derive(Serialize)]
struct DuplicateRow<'a> {
    digest: &'a str,
    filename: &'a str,
    domains: &'a str,
}

fn join_domains(domains: &[Domain]) -> String {
    domains
        .iter()
        .map(Domain::as_str)
        .collect::<Vec<_>>()
        .join(&DOMAIN_SEPARATOR.to_string())
}

/// Write `header` and then every row, even when there are no rows.
fn write_table<W, R, I>(out: W, header: &[&str], rows: I) -> Result<(), ReportError>
where
    W: Write,
    R: Serialize,
    I: IntoIterator<Item = R>,
{
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// `group_id,domains` with one row per cluster, singletons included.
pub fn write_clusters<W: Write>(out: W, clusters: &[DomainCluster]) -> Result<(), ReportError> {
    let joined: Vec<(usize, String)> = clusters
        .iter()
        .map(|c| (c.group_id, join_domains(&c.domains)))
        .collect();
    write_table(
        out,
        &["group_id", "domains"],
        joined.iter().map(|(group_id, domains)| ClusterRow {
            group_id: *group_id,
            domains,
        }),
    )
}

pub fn write_skipped<W: Write>(out: W, skipped: &[SkippedAsset]) -> Result<(), ReportError> {
    write_table(out, &["filename", "kind", "reason"], skipped)
}

pub fn write_mapping<W: Write>(out: W, mapping: &[(Domain, String)]) -> Result<(), ReportError> {
    write_table(
        out,
        &["domain", "filename"],
        mapping.iter().map(|(domain, filename)| MappingRow {
            domain: domain.as_str(),
            filename,
        }),
    )
}

pub fn write_duplicates<W: Write>(
    out: W,
    duplicates: &[DuplicateGroup],
) -> Result<(), ReportError> {
    let joined: Vec<String> = duplicates.iter().map(|g| join_domains(&g.domains)).collect();
    write_table(
        out,
        &["digest", "filename", "domains"],
        duplicates
            .iter()
            .zip(&joined)
            .map(|(group, domains)| DuplicateRow {
                digest: &group.digest,
                filename: &group.filename,
                domains,
            }),
    )
}

pub fn write_json<W: Write, T: Serialize + ?Sized>(mut out: W, value: &T) -> Result<(), ReportError> {
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

/// One row of a cluster table as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRow {
    pub group_id: usize,
    pub domains: Vec<String>,
}

/// Read a table written by [`write_clusters`].
pub fn read_groups<R: Read>(reader: R) -> Result<Vec<GroupRow>, ReportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        if record.iter().all(str::is_empty) || (line == 1 && &record[0] == "group_id") {
            continue;
        }

        let malformed = |message: String| ReportError::Malformed { line, message };
        if record.len() != 2 {
            return Err(malformed("expected `group_id,domains`".to_string()));
        }
        let group_id = record[0]
            .parse()
            .map_err(|_| malformed(format!("invalid group id '{}'", &record[0])))?;
        let domains = record[1]
            .split(DOMAIN_SEPARATOR)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect();

        rows.push(GroupRow { group_id, domains });
    }
    Ok(rows)
}

/// Cluster size histogram and headline counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupDistribution {
    /// Cluster size -> number of clusters of that size
    pub sizes: BTreeMap<usize, usize>,
    pub groups: usize,
    pub singletons: usize,
    pub total_domains: usize,
    pub largest: usize,
}

impl GroupDistribution {
    pub fn from_sizes(sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut dist = GroupDistribution::default();
        for size in sizes {
            *dist.sizes.entry(size).or_insert(0) += 1;
            dist.groups += 1;
            dist.total_domains += size;
            dist.largest = dist.largest.max(size);
            if size == 1 {
                dist.singletons += 1;
            }
        }
        dist
    }

    pub fn from_clusters(clusters: &[DomainCluster]) -> Self {
        Self::from_sizes(clusters.iter().map(|c| c.domains.len()))
    }

    pub fn from_rows(rows: &[GroupRow]) -> Self {
        Self::from_sizes(rows.iter().map(|r| r.domains.len()))
    }

    /// Domains that landed in a cluster of two or more.
    pub fn grouped_domains(&self) -> usize {
        self.total_domains - self.singletons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pipeline::SkipKind;
    use std::io::Cursor;

    fn cluster(group_id: usize, domains: &[&str]) -> DomainCluster {
        DomainCluster {
            group_id,
            domains: domains.iter().map(|d| Domain::parse(d).unwrap()).collect(),
            filenames: Vec::new(),
        }
    }

    #[test]
    fn test_cluster_table_round_trip() {
        let clusters = vec![
            cluster(1, &["a.com", "b.com", "d.com"]),
            cluster(2, &["c.com"]),
        ];
        let mut out = Vec::new();
        write_clusters(&mut out, &clusters).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert_eq!(text, "group_id,domains\n1,a.com;b.com;d.com\n2,c.com\n");

        let rows = read_groups(Cursor::new(out)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].domains, vec!["a.com", "b.com", "d.com"]);
        assert_eq!(rows[1].group_id, 2);
    }

    #[test]
    fn test_skip_report_quotes_fields() {
        let skipped = vec![SkippedAsset {
            filename: "odd,name.png".to_string(),
            kind: SkipKind::UnreadableAsset,
            reason: "said \"no\"".to_string(),
        }];
        let mut out = Vec::new();
        write_skipped(&mut out, &skipped).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "filename,kind,reason\n\"odd,name.png\",unreadable_asset,\"said \"\"no\"\"\"\n"
        );
    }

    #[test]
    fn test_mapping_and_json() {
        let mapping = vec![(Domain::parse("a.com").unwrap(), "a_com_1.png".to_string())];
        let mut out = Vec::new();
        write_mapping(&mut out, &mapping).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "domain,filename\na.com,a_com_1.png\n");

        let mut json = Vec::new();
        write_json(&mut json, &[cluster(1, &["a.com"])]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value[0]["group_id"], 1);
        assert_eq!(value[0]["domains"][0], "a.com");
    }

    #[test]
    fn test_quoted_group_cells_are_read() {
        let rows = read_groups(Cursor::new("group_id,domains\n3,\"a.com; b.com\"\n")).unwrap();
        assert_eq!(rows[0].group_id, 3);
        assert_eq!(rows[0].domains, vec!["a.com", "b.com"]);
    }

    #[test]
    fn test_empty_tables_keep_headers() {
        let mut out = Vec::new();
        write_skipped(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "filename,kind,reason\n");

        let duplicates = vec![DuplicateGroup {
            digest: "00ff".to_string(),
            filename: "a_com_1.png".to_string(),
            domains: vec![Domain::parse("a.com").unwrap(), Domain::parse("b.com").unwrap()],
        }];
        let mut out = Vec::new();
        write_duplicates(&mut out, &duplicates).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "digest,filename,domains\n00ff,a_com_1.png,a.com;b.com\n"
        );
    }

    #[test]
    fn test_malformed_group_table() {
        let result = read_groups(Cursor::new("group_id,domains\nx,a.com\n"));
        assert!(matches!(result, Err(ReportError::Malformed { line: 2, .. })));
        let result = read_groups(Cursor::new("7\n"));
        assert!(matches!(result, Err(ReportError::Malformed { line: 1, .. })));
    }

    #[test]
    fn test_distribution() {
        let clusters = vec![
            cluster(1, &["a.com", "b.com", "c.com"]),
            cluster(2, &["d.com"]),
            cluster(3, &["e.com", "f.com"]),
            cluster(4, &["g.com"]),
        ];
        let dist = GroupDistribution::from_clusters(&clusters);
        assert_eq!(dist.groups, 4);
        assert_eq!(dist.singletons, 2);
        assert_eq!(dist.total_domains, 7);
        assert_eq!(dist.largest, 3);
        assert_eq!(dist.grouped_domains(), 5);
        assert_eq!(dist.sizes, BTreeMap::from([(1, 2), (2, 1), (3, 1)]));
    }
}
