//! STEM (Short Time-series Expression Miner) adapter
//!
//! STEM runs as a batch subprocess: we write a tab-separated data file and a
//! settings file, launch the configured command and read back the profile
//! and gene tables it leaves in the output directory.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use super::{ClusterProfile, EffectTable, TrajectoryClusterer};
use crate::config::{ClusteringParams, StemCorrection, StemNormalization};
use crate::error::{PipelineError, Result};

const TOOL: &str = "STEM";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs STEM on an effect table inside a working directory
#[derive(Debug, Clone)]
pub struct StemAdapter {
    params: ClusteringParams,
    work_dir: PathBuf,
}

impl StemAdapter {
    pub fn new(params: ClusteringParams, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            params,
            work_dir: work_dir.into(),
        }
    }

    pub fn input_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}.tsv", self.params.output_prefix))
    }

    pub fn settings_path(&self) -> PathBuf {
        self.work_dir.join("stem_settings.txt")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("stem_output")
    }

    /// Write the genes x time points data file STEM reads
    pub fn write_input(&self, effects: &EffectTable) -> Result<PathBuf> {
        let path = self.input_path();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&path)?;

        let mut header = vec!["Gene".to_string()];
        if self.params.add_zero_time_point {
            header.push("0".to_string());
        }
        header.extend(effects.time_labels.iter().cloned());
        writer.write_record(&header)?;

        for (g, gene) in effects.gene_ids.iter().enumerate() {
            let mut row = vec![gene.clone()];
            if self.params.add_zero_time_point {
                row.push("0".to_string());
            }
            row.extend(effects.values.row(g).iter().map(|v| v.to_string()));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(path)
    }

    /// Write the batch-mode settings file pointing at `data_file`
    pub fn write_settings(&self, data_file: &Path) -> Result<PathBuf> {
        let path = self.settings_path();
        let p = &self.params;
        let normalization = match p.normalization {
            StemNormalization::LogNormalize => "Log normalize data",
            StemNormalization::Normalize => "Normalize data",
            StemNormalization::NoNormalizationAddZero => "No normalization/add 0",
        };
        let correction = match p.correction {
            StemCorrection::Bonferroni => "Bonferroni Correction",
            StemCorrection::FalseDiscoveryRate => "False Discovery Rate",
            StemCorrection::None => "None",
        };

        let mut file = File::create(&path)?;
        writeln!(file, "#Main Input:")?;
        writeln!(file, "Data_File\t{}", data_file.display())?;
        writeln!(file, "Spot_IDs_included_in_the_data_file\tfalse")?;
        writeln!(file, "Clustering_Method[STEM Clustering Method,K-means]\tSTEM Clustering Method")?;
        writeln!(file, "Maximum_Number_of_Model_Profiles\t{}", p.max_profiles)?;
        writeln!(
            file,
            "Maximum_Unit_Change_in_Model_Profiles_between_Time_Points\t{}",
            p.max_unit_change
        )?;
        writeln!(file, "Normalize_Data[Log normalize data,Normalize data,No normalization/add 0]\t{}", normalization)?;
        writeln!(file, "#Advanced Options:")?;
        writeln!(file, "Number_of_Permutations_per_Gene\t{}", p.permutations_per_gene)?;
        writeln!(file, "Significance_Level\t{}", p.significance)?;
        writeln!(file, "Correction_Method[Bonferroni Correction,False Discovery Rate,None]\t{}", correction)?;
        Ok(path)
    }

    /// Launch the command and wait, killing it after the timeout
    fn run_tool(&self, input: &Path, settings: &Path, output: &Path) -> Result<()> {
        let substitute = |arg: &str| {
            arg.replace("{settings}", &settings.display().to_string())
                .replace("{output}", &output.display().to_string())
                .replace("{input}", &input.display().to_string())
        };
        let args: Vec<String> = self.params.command.args.iter().map(|a| substitute(a)).collect();
        log::info!("Running {} {}", self.params.command.program, args.join(" "));

        let stdout = File::create(self.work_dir.join("stem_stdout.log"))?;
        let stderr = File::create(self.work_dir.join("stem_stderr.log"))?;
        let mut child = Command::new(&self.params.command.program)
            .args(&args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| PipelineError::ExternalTool {
                tool: TOOL.to_string(),
                reason: format!("failed to launch '{}': {}", self.params.command.program, e),
            })?;

        let timeout = Duration::from_secs(self.params.timeout_secs);
        let start = Instant::now();
        let status: ExitStatus = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PipelineError::ExternalTool {
                    tool: TOOL.to_string(),
                    reason: format!("timed out after {} s", self.params.timeout_secs),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(PipelineError::ExternalTool {
                tool: TOOL.to_string(),
                reason: format!(
                    "exited with {}; see {}",
                    status,
                    self.work_dir.join("stem_stderr.log").display()
                ),
            });
        }
        log::debug!("{} finished in {:.1} s", TOOL, start.elapsed().as_secs_f64());
        Ok(())
    }
}

impl TrajectoryClusterer for StemAdapter {
    fn cluster(&self, effects: &EffectTable) -> Result<Vec<ClusterProfile>> {
        if effects.n_genes() == 0 {
            return Err(PipelineError::EmptyData {
                reason: "no genes to cluster".to_string(),
            });
        }
        fs::create_dir_all(&self.work_dir)?;
        let output = self.output_dir();
        fs::create_dir_all(&output)?;

        let input = self.write_input(effects)?;
        let settings = self.write_settings(&input)?;
        self.run_tool(&input, &settings, &output)?;

        let prefix = &self.params.output_prefix;
        let profile_path = output.join(format!("{}_profiletable.txt", prefix));
        let gene_path = output.join(format!("{}_genetable.txt", prefix));
        for path in [&profile_path, &gene_path] {
            if !path.exists() {
                return Err(PipelineError::MalformedOutput {
                    artifact: path.display().to_string(),
                    reason: "STEM did not write this table".to_string(),
                });
            }
        }

        let mut profiles = parse_profile_table(&fs::read_to_string(&profile_path)?)?;
        let members = parse_gene_table(&fs::read_to_string(&gene_path)?)?;
        for p in &mut profiles {
            if let Some(genes) = members.get(&p.id) {
                p.members = genes.clone();
            }
        }
        log::info!(
            "{} returned {} profiles, {} with p <= {}",
            TOOL,
            profiles.len(),
            profiles.iter().filter(|p| p.p_value <= self.params.max_profile_p).count(),
            self.params.max_profile_p
        );
        Ok(profiles)
    }
}

fn malformed(artifact: &str, reason: impl Into<String>) -> PipelineError {
    PipelineError::MalformedOutput {
        artifact: artifact.to_string(),
        reason: reason.into(),
    }
}

fn tsv_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(text.as_bytes())
}

fn column(headers: &csv::StringRecord, artifact: &str, pred: impl Fn(&str) -> bool, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| pred(h.trim()))
        .ok_or_else(|| malformed(artifact, format!("missing column '{}'", name)))
}

fn parse_number<T: std::str::FromStr>(artifact: &str, field: Option<&str>, name: &str) -> Result<T> {
    let raw = field.ok_or_else(|| malformed(artifact, format!("row without '{}'", name)))?;
    raw.trim()
        .parse()
        .map_err(|_| malformed(artifact, format!("bad {} value '{}'", name, raw)))
}

/// Parse STEM's profile table
///
/// Members are left empty; they come from the gene table.
pub fn parse_profile_table(text: &str) -> Result<Vec<ClusterProfile>> {
    const ARTIFACT: &str = "STEM profile table";
    let mut reader = tsv_reader(text);
    let headers = reader.headers()?.clone();
    let id_col = column(&headers, ARTIFACT, |h| h == "Profile ID", "Profile ID")?;
    let model_col = column(&headers, ARTIFACT, |h| h == "Profile Model", "Profile Model")?;
    let cluster_col = column(&headers, ARTIFACT, |h| h.starts_with("Cluster"), "Cluster")?;
    let expected_col = column(
        &headers,
        ARTIFACT,
        |h| h == "Number of Genes Expected",
        "Number of Genes Expected",
    )?;
    let p_col = column(&headers, ARTIFACT, |h| h.eq_ignore_ascii_case("p-value"), "p-value")?;

    let mut profiles = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let model_field = row
            .get(model_col)
            .ok_or_else(|| malformed(ARTIFACT, "row without 'Profile Model'"))?;
        let model = model_field
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| malformed(ARTIFACT, format!("bad model value '{}'", s)))
            })
            .collect::<Result<Vec<f64>>>()?;
        profiles.push(ClusterProfile {
            id: parse_number(ARTIFACT, row.get(id_col), "Profile ID")?,
            model,
            cluster: parse_number(ARTIFACT, row.get(cluster_col), "Cluster")?,
            members: Vec::new(),
            expected: parse_number(ARTIFACT, row.get(expected_col), "Number of Genes Expected")?,
            p_value: parse_number(ARTIFACT, row.get(p_col), "p-value")?,
        });
    }
    Ok(profiles)
}

/// Parse STEM's gene table into profile id -> assigned genes, in file order
pub fn parse_gene_table(text: &str) -> Result<HashMap<u32, Vec<String>>> {
    const ARTIFACT: &str = "STEM gene table";
    let mut reader = tsv_reader(text);
    let headers = reader.headers()?.clone();
    let gene_col = column(
        &headers,
        ARTIFACT,
        |h| h == "Gene Symbol" || h.eq_ignore_ascii_case("spot"),
        "Gene Symbol",
    )?;
    let profile_col = column(&headers, ARTIFACT, |h| h == "Profile", "Profile")?;

    let mut members: HashMap<u32, Vec<String>> = HashMap::new();
    for row in reader.records() {
        let row = row?;
        let gene = match row.get(gene_col).map(str::trim) {
            Some(g) if !g.is_empty() => g.to_string(),
            _ => continue,
        };
        let profile: u32 = parse_number(ARTIFACT, row.get(profile_col), "Profile")?;
        members.entry(profile).or_default().push(gene);
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolCommand;
    use ndarray::array;
    use tempfile::TempDir;

    const PROFILES: &str = "Profile ID\tProfile Model\tCluster (-1 non-significant)\tNumber of Genes Assigned\tNumber of Genes Expected\tp-value\n\
                            3\t(0,1,2)\t1\t2\t0.4\t0.001\n\
                            7\t0,-1,-1\t-1\t1\t0.9\t0.6\n";
    const GENES: &str = "Gene Symbol\tProfile\t0\t6h\t24h\n\
                         Hmox1\t3\t0\t1.1\t2.0\n\
                         Mt1\t3\t0\t0.9\t1.8\n\
                         Cyp7a1\t7\t0\t-1.2\t-0.8\n";

    fn effects() -> EffectTable {
        EffectTable {
            gene_ids: vec!["Hmox1".into(), "Mt1".into(), "Cyp7a1".into()],
            time_labels: vec!["6h".into(), "24h".into()],
            values: array![[1.1, 2.0], [0.9, 1.8], [-1.2, -0.8]],
        }
    }

    fn shell(script: &str, timeout_secs: u64) -> ClusteringParams {
        ClusteringParams {
            command: ToolCommand {
                program: "sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    script.to_string(),
                    "stem".to_string(),
                    "{settings}".to_string(),
                    "{output}".to_string(),
                ],
            },
            timeout_secs,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_profile_table() {
        let profiles = parse_profile_table(PROFILES).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].id, 3);
        assert_eq!(profiles[0].model, vec![0.0, 1.0, 2.0]);
        assert_eq!(profiles[0].cluster, 1);
        assert!((profiles[0].p_value - 0.001).abs() < 1e-12);
        assert_eq!(profiles[1].model, vec![0.0, -1.0, -1.0]);
        assert_eq!(profiles[1].cluster, -1);
    }

    #[test]
    fn test_parse_gene_table() {
        let members = parse_gene_table(GENES).unwrap();
        assert_eq!(members[&3], vec!["Hmox1".to_string(), "Mt1".to_string()]);
        assert_eq!(members[&7], vec!["Cyp7a1".to_string()]);
    }

    #[test]
    fn test_malformed_profile_table() {
        let err = parse_profile_table("Profile ID\tModel\n1\t0,1\n").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput { .. }));
        let err = parse_profile_table(
            "Profile ID\tProfile Model\tCluster\tNumber of Genes Expected\tp-value\nx\t0,1\t1\t1\t0.1\n",
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput { .. }));
    }

    #[test]
    fn test_input_and_settings_files() {
        let dir = TempDir::new().unwrap();
        let params = ClusteringParams {
            add_zero_time_point: true,
            ..Default::default()
        };
        let adapter = StemAdapter::new(params, dir.path());
        let input = adapter.write_input(&effects()).unwrap();
        let text = fs::read_to_string(&input).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Gene\t0\t6h\t24h"));
        assert_eq!(lines.next(), Some("Hmox1\t0\t1.1\t2"));

        let settings = fs::read_to_string(adapter.write_settings(&input).unwrap()).unwrap();
        assert!(settings.contains("Maximum_Number_of_Model_Profiles\t50"));
        assert!(settings.contains("\tNo normalization/add 0"));
        assert!(settings.contains("\tBonferroni Correction"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cluster_reads_tool_output() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("profiles.txt"), PROFILES).unwrap();
        fs::write(dir.path().join("genes.txt"), GENES).unwrap();
        let script = "test -f \"$1\" && cp profiles.txt \"$2/stem_input_profiletable.txt\" && cp genes.txt \"$2/stem_input_genetable.txt\"";
        let adapter = StemAdapter::new(shell(script, 30), dir.path());

        let profiles = adapter.cluster(&effects()).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].size(), 2);
        assert_eq!(profiles[1].members, vec!["Cyp7a1".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_tool_error() {
        let dir = TempDir::new().unwrap();
        let adapter = StemAdapter::new(shell("echo boom >&2; exit 3", 30), dir.path());
        let err = adapter.cluster(&effects()).unwrap_err();
        assert!(matches!(err, PipelineError::ExternalTool { .. }));
        let log = fs::read_to_string(dir.path().join("stem_stderr.log")).unwrap();
        assert!(log.contains("boom"));
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_tables_are_malformed_output() {
        let dir = TempDir::new().unwrap();
        let adapter = StemAdapter::new(shell("exit 0", 30), dir.path());
        let err = adapter.cluster(&effects()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_tool() {
        let dir = TempDir::new().unwrap();
        let adapter = StemAdapter::new(shell("sleep 30", 1), dir.path());
        let start = Instant::now();
        let err = adapter.cluster(&effects()).unwrap_err();
        assert!(matches!(err, PipelineError::ExternalTool { ref reason, .. } if reason.contains("timed out")));
        assert!(start.elapsed() < Duration::from_secs(20));
    }
}
