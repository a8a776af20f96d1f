//! Delimited-text reading and writing for matrices, metadata and result tables
//!
//! Inputs may be tab- or comma-separated; everything written is TSV.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::DeTable;
use crate::clustering::{ClusterProfile, EffectTable};
use crate::data::{
    CountMatrix, ExpressionMatrix, Factor, FactorMap, FactorMapEntry, ProbeIntensities,
    SampleMetadata, SampleRecord,
};
use crate::enrichment::EnrichmentRecord;
use crate::error::{PipelineError, Result};

/// Detect the delimiter from the header line
fn sniff_delimiter(path: &Path) -> Result<u8> {
    let mut header = String::new();
    BufReader::new(File::open(path)?).read_line(&mut header)?;
    if header.trim().is_empty() {
        return Err(PipelineError::EmptyData {
            reason: format!("{} is empty", path.display()),
        });
    }
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

fn reader(path: &Path) -> Result<csv::Reader<File>> {
    let delimiter = sniff_delimiter(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)?)
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>> {
    Ok(csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

/// Read a labelled numeric table: `leading` id columns, then one column per sample
fn read_table(
    path: &Path,
    leading: usize,
) -> Result<(Vec<Vec<String>>, Vec<String>, Array2<f64>)> {
    let mut rdr = reader(path)?;
    let header = rdr.headers()?.clone();
    if header.len() <= leading {
        return Err(PipelineError::InvalidMatrix {
            reason: format!("{}: no sample columns in header", path.display()),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(leading).map(str::to_string).collect();
    let n_samples = sample_ids.len();

    let mut ids: Vec<Vec<String>> = vec![Vec::new(); leading];
    let mut data: Vec<f64> = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        if record.len() != n_samples + leading {
            return Err(PipelineError::InvalidMatrix {
                reason: format!(
                    "{} row {}: {} columns, expected {}",
                    path.display(),
                    line + 2,
                    record.len(),
                    n_samples + leading
                ),
            });
        }
        for (k, col) in ids.iter_mut().enumerate() {
            col.push(record[k].to_string());
        }
        for field in record.iter().skip(leading) {
            let value = match field {
                "NA" | "NaN" | "" => f64::NAN,
                v => v.parse::<f64>().map_err(|_| PipelineError::InvalidMatrix {
                    reason: format!("{} row {}: invalid value '{}'", path.display(), line + 2, v),
                })?,
            };
            data.push(value);
        }
    }

    let n_rows = data.len() / n_samples;
    if n_rows == 0 {
        return Err(PipelineError::EmptyData {
            reason: format!("no data rows in {}", path.display()),
        });
    }
    let values = Array2::from_shape_vec((n_rows, n_samples), data).map_err(|e| {
        PipelineError::InvalidMatrix {
            reason: e.to_string(),
        }
    })?;
    Ok((ids, sample_ids, values))
}

fn single_id_column(mut ids: Vec<Vec<String>>) -> Vec<String> {
    ids.pop().unwrap_or_default()
}

/// Read raw counts: gene id column, then one column per sample
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let (ids, sample_ids, values) = read_table(path.as_ref(), 1)?;
    CountMatrix::new(values, single_id_column(ids), sample_ids)
}

/// Read a genes x samples expression matrix
pub fn read_expression_matrix<P: AsRef<Path>>(path: P) -> Result<ExpressionMatrix> {
    let (ids, sample_ids, values) = read_table(path.as_ref(), 1)?;
    ExpressionMatrix::new(values, single_id_column(ids), sample_ids)
}

/// Read probe intensities: probe_id, probeset_id, then one column per sample
pub fn read_probe_intensities<P: AsRef<Path>>(path: P) -> Result<ProbeIntensities> {
    let (mut ids, sample_ids, values) = read_table(path.as_ref(), 2)?;
    let probeset_ids = ids.pop().unwrap_or_default();
    let probe_ids = ids.pop().unwrap_or_default();
    ProbeIntensities::new(values, probe_ids, probeset_ids, sample_ids)
}

#[derive(Debug, Deserialize)]
struct AnnotationRow {
    probeset_id: String,
    #[serde(default)]
    symbol: String,
}

/// Read a probeset_id -> symbol annotation
pub fn read_annotation<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let mut rdr = reader(path.as_ref())?;
    let mut annotation = HashMap::new();
    for row in rdr.deserialize() {
        let row: AnnotationRow = row?;
        annotation.insert(row.probeset_id, row.symbol);
    }
    Ok(annotation)
}

/// Read a label -> factors mapping table
pub fn read_factor_map<P: AsRef<Path>>(path: P) -> Result<FactorMap> {
    let mut rdr = reader(path.as_ref())?;
    let entries = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<FactorMapEntry>, csv::Error>>()?;
    FactorMap::new(entries)
}

#[derive(Debug, Deserialize)]
struct LabelRow {
    sample_id: String,
    label: String,
}

/// Read sample metadata
///
/// Without a factor map the table carries `sample_id`, `treatment` and the
/// optional `time`, `tissue` and `diet` columns. With a factor map it only
/// needs `sample_id` and `label`.
pub fn read_metadata<P: AsRef<Path>>(
    path: P,
    factor_map: Option<&FactorMap>,
    group_by: &[Factor],
) -> Result<SampleMetadata> {
    let mut rdr = reader(path.as_ref())?;
    let records: Vec<SampleRecord> = match factor_map {
        Some(map) => {
            let labelled = rdr
                .deserialize()
                .map(|row| row.map(|r: LabelRow| (r.sample_id, r.label)))
                .collect::<std::result::Result<Vec<_>, csv::Error>>()?;
            map.resolve(&labelled)?
        }
        None => rdr
            .deserialize()
            .collect::<std::result::Result<Vec<SampleRecord>, csv::Error>>()?,
    };
    SampleMetadata::new(records, group_by)
}

#[derive(Debug, Serialize)]
struct MetadataRow<'a> {
    sample_id: &'a str,
    treatment: &'a str,
    time: Option<&'a str>,
    tissue: Option<&'a str>,
    diet: Option<&'a str>,
    group: &'a str,
}

/// Write metadata with its derived group column
pub fn write_metadata<P: AsRef<Path>>(path: P, metadata: &SampleMetadata) -> Result<()> {
    let mut wtr = tsv_writer(path.as_ref())?;
    for s in metadata.samples() {
        wtr.serialize(MetadataRow {
            sample_id: &s.sample_id,
            treatment: &s.treatment,
            time: s.time.as_ref().map(|t| t.label.as_str()),
            tissue: s.tissue.as_deref(),
            diet: s.diet.as_deref(),
            group: &s.group,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a labelled numeric matrix with `first_column` as the id header
fn write_labelled(
    path: &Path,
    first_column: &str,
    row_ids: &[String],
    column_ids: &[String],
    values: ndarray::ArrayView2<'_, f64>,
) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    let mut header = Vec::with_capacity(column_ids.len() + 1);
    header.push(first_column.to_string());
    header.extend(column_ids.iter().cloned());
    wtr.write_record(&header)?;
    for (i, id) in row_ids.iter().enumerate() {
        let mut row = Vec::with_capacity(column_ids.len() + 1);
        row.push(id.clone());
        row.extend(values.row(i).iter().map(|v| format_value(*v)));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        format!("{:.6}", v)
    }
}

/// Write a genes x samples matrix (normalized values or z-scores)
pub fn write_expression_matrix<P: AsRef<Path>>(path: P, matrix: &ExpressionMatrix) -> Result<()> {
    write_labelled(
        path.as_ref(),
        "gene_id",
        matrix.gene_ids(),
        matrix.sample_ids(),
        matrix.values(),
    )
}

/// Write the genes x time points effect table
pub fn write_effect_table<P: AsRef<Path>>(path: P, effects: &EffectTable) -> Result<()> {
    write_labelled(
        path.as_ref(),
        "gene_id",
        &effects.gene_ids,
        &effects.time_labels,
        effects.values.view(),
    )
}

/// Write every record of a result table
pub fn write_de_table<P: AsRef<Path>>(path: P, table: &DeTable) -> Result<()> {
    let mut wtr = tsv_writer(path.as_ref())?;
    for record in &table.records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a result table written by [`write_de_table`]
pub fn read_de_table<P: AsRef<Path>>(path: P) -> Result<DeTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path.as_ref())?;
    let records = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<_>, csv::Error>>()?;
    Ok(DeTable::new(records))
}

#[derive(Debug, Serialize, Deserialize)]
struct ClusterRow {
    profile_id: u32,
    model: String,
    cluster: i32,
    size: usize,
    expected: f64,
    p_value: f64,
    members: String,
}

/// Write profiles with comma-joined model values and members
pub fn write_clusters<P: AsRef<Path>>(path: P, profiles: &[ClusterProfile]) -> Result<()> {
    let mut wtr = tsv_writer(path.as_ref())?;
    for p in profiles {
        wtr.serialize(ClusterRow {
            profile_id: p.id,
            model: p.model.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","),
            cluster: p.cluster,
            size: p.size(),
            expected: p.expected,
            p_value: p.p_value,
            members: p.members.join(","),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read profiles written by [`write_clusters`]
pub fn read_clusters<P: AsRef<Path>>(path: P) -> Result<Vec<ClusterProfile>> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    let mut profiles = Vec::new();
    for row in rdr.deserialize() {
        let row: ClusterRow = row?;
        let model = row
            .model
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>().map_err(|_| PipelineError::MalformedOutput {
                    artifact: path.display().to_string(),
                    reason: format!("bad model value '{}'", s),
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        profiles.push(ClusterProfile {
            id: row.profile_id,
            model,
            cluster: row.cluster,
            members: row
                .members
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            expected: row.expected,
            p_value: row.p_value,
        });
    }
    Ok(profiles)
}

#[derive(Debug, Serialize)]
struct EnrichmentRow<'a> {
    profile_id: u32,
    gene_set: &'a str,
    set_size: usize,
    profile_size: usize,
    overlap: usize,
    fold_enrichment: f64,
    p_value: f64,
    adj_p_value: Option<f64>,
    overlapping_genes: String,
}

/// Write enrichment records with comma-joined overlapping genes
pub fn write_enrichment<P: AsRef<Path>>(path: P, records: &[EnrichmentRecord]) -> Result<()> {
    let mut wtr = tsv_writer(path.as_ref())?;
    for r in records {
        wtr.serialize(EnrichmentRow {
            profile_id: r.profile_id,
            gene_set: &r.gene_set,
            set_size: r.set_size,
            profile_size: r.profile_size,
            overlap: r.overlap,
            fold_enrichment: r.fold_enrichment,
            p_value: r.p_value,
            adj_p_value: r.adj_p_value,
            overlapping_genes: r.overlapping_genes.join(","),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write any serializable rows as TSV with a header from the field names
pub fn write_rows<P: AsRef<Path>, T: Serialize>(path: P, rows: &[T]) -> Result<()> {
    let mut wtr = tsv_writer(path.as_ref())?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{DeRecord, Regulation};
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_read_count_matrix() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\ts1\ts2\ts3").unwrap();
        writeln!(file, "gene1\t100\t200\t150").unwrap();
        writeln!(file, "gene2\t50\t75\t60").unwrap();

        let matrix = read_count_matrix(file.path()).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.counts()[[1, 2]], 60.0);
    }

    #[test]
    fn test_read_comma_separated_with_quotes() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "\"gene_id\",\"a\",\"b\"").unwrap();
        writeln!(file, "\"Alb\",7.5,8.25").unwrap();

        let m = read_expression_matrix(file.path()).unwrap();
        assert_eq!(m.gene_ids(), &["Alb".to_string()]);
        assert_eq!(m.sample_ids(), &["a".to_string(), "b".to_string()]);
        assert_eq!(m.values()[[0, 1]], 8.25);
    }

    #[test]
    fn test_ragged_row_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\ts1\ts2").unwrap();
        writeln!(file, "gene1\t1").unwrap();
        assert!(read_count_matrix(file.path()).is_err());
    }

    #[test]
    fn test_read_probes_and_annotation() {
        let dir = TempDir::new().unwrap();
        let probes = dir.path().join("probes.tsv");
        std::fs::write(&probes, "probe_id\tprobeset_id\tA\tB\np1\tps1\t100\t120\np2\tps1\t90\t95\n").unwrap();
        let p = read_probe_intensities(&probes).unwrap();
        assert_eq!(p.probeset_ids(), &["ps1".to_string(), "ps1".to_string()]);
        assert_eq!(p.probe_ids()[1], "p2");

        let annot = dir.path().join("annot.tsv");
        std::fs::write(&annot, "probeset_id\tsymbol\nps1\tAlb\nps2\t\n").unwrap();
        let a = read_annotation(&annot).unwrap();
        assert_eq!(a["ps1"], "Alb");
        assert_eq!(a["ps2"], "");
    }

    #[test]
    fn test_metadata_with_and_without_factor_map() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("meta.tsv");
        std::fs::write(&plain, "sample_id\ttreatment\ttime\ns1\tCtrl\t6h\ns2\tAPAP\t6h\n").unwrap();
        let md = read_metadata(&plain, None, &[Factor::Treatment, Factor::Time]).unwrap();
        assert_eq!(md.groups(), vec!["Ctrl_6h", "APAP_6h"]);

        let map_path = dir.path().join("map.tsv");
        std::fs::write(&map_path, "label\ttreatment\ttime\nveh\tCtrl\t2w\nccl4\tCCl4\t2w\n").unwrap();
        let map = read_factor_map(&map_path).unwrap();
        let labelled = dir.path().join("labels.tsv");
        std::fs::write(&labelled, "sample_id\tlabel\nGSM1\tveh\nGSM2\tccl4\n").unwrap();
        let md = read_metadata(&labelled, Some(&map), &[Factor::Treatment]).unwrap();
        assert_eq!(md.sample(1).treatment, "CCl4");

        let out = dir.path().join("out.tsv");
        write_metadata(&out, &md).unwrap();
        let back = read_metadata(&out, None, &[Factor::Treatment]).unwrap();
        assert_eq!(back.sample_ids(), md.sample_ids());
    }

    #[test]
    fn test_de_table_and_clusters_reload() {
        let dir = TempDir::new().unwrap();
        let table = DeTable::new(vec![
            DeRecord {
                gene_id: "Hmox1".into(),
                contrast: "apap_6h".into(),
                log_fc: 2.5,
                ave_expr: 7.0,
                t: Some(9.1),
                p_value: Some(1e-6),
                adj_p_value: Some(1e-4),
                df: Some(12.0),
                estimable: true,
                regulation: Regulation::Up,
            },
            DeRecord {
                gene_id: "Alb".into(),
                contrast: "apap_6h".into(),
                log_fc: 0.1,
                ave_expr: 12.0,
                t: None,
                p_value: None,
                adj_p_value: None,
                df: None,
                estimable: false,
                regulation: Regulation::Ns,
            },
        ]);
        let path = dir.path().join("de.tsv");
        write_de_table(&path, &table).unwrap();
        assert_eq!(read_de_table(&path).unwrap(), table);

        let profiles = vec![ClusterProfile {
            id: 4,
            model: vec![0.0, 1.0, 2.0],
            cluster: 2,
            members: vec!["Hmox1".into(), "Mt1".into()],
            expected: 0.5,
            p_value: 0.001,
        }];
        let path = dir.path().join("clusters.tsv");
        write_clusters(&path, &profiles).unwrap();
        assert_eq!(read_clusters(&path).unwrap(), profiles);
    }
}
