use crate::engine::HydraulicEngine;
use crate::network::Hydrograph;
use anyhow::{Context, Result, anyhow};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord, Writer, WriterBuilder};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

// One hydrograph row
#[derive(Debug)]
struct InflowRecord {
    time: f64,
    flow: f64,
    concentrations: Vec<f64>,
}

impl InflowRecord {
    fn from_record(
        record: &StringRecord,
        time_index: usize,
        flow_index: usize,
        conc_indices: &[Option<usize>],
    ) -> Result<Self> {
        let field = |idx: usize| -> Result<f64> {
            let raw = record
                .get(idx)
                .ok_or_else(|| anyhow!("Record has fewer than {} fields", idx + 1))?;
            raw.trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid number: {:?}", raw))
        };

        let concentrations = conc_indices
            .iter()
            .map(|idx| match idx {
                Some(idx) => field(*idx),
                None => Ok(0.0),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(InflowRecord {
            time: field(time_index)?,
            flow: field(flow_index)?,
            concentrations,
        })
    }
}

/// Read a hydrograph with a `time,flow,<pollutant...>` header. Pollutants
/// without a column enter at zero concentration.
pub fn read_hydrograph<R: Read>(reader: R, pollutants: &[String]) -> Result<Hydrograph> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let time_index = position("time").ok_or_else(|| anyhow!("Missing `time` column"))?;
    let flow_index = position("flow").ok_or_else(|| anyhow!("Missing `flow` column"))?;
    let conc_indices: Vec<Option<usize>> = pollutants
        .iter()
        .map(|p| {
            let idx = position(p);
            if idx.is_none() {
                warn!("No inflow concentration column for pollutant {}", p);
            }
            idx
        })
        .collect();

    let mut times = Vec::new();
    let mut flows = Vec::new();
    let mut concentrations = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result?;
        let row = InflowRecord::from_record(&record, time_index, flow_index, &conc_indices)
            .with_context(|| format!("Bad hydrograph row {}", line + 1))?;
        times.push(row.time);
        flows.push(row.flow);
        concentrations.push(row.concentrations);
    }

    Ok(Hydrograph::new(times, flows, concentrations)?)
}

pub fn load_hydrograph(path: &Path, pollutants: &[String]) -> Result<Hydrograph> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let hydrograph = read_hydrograph(BufReader::new(file), pollutants)
        .with_context(|| format!("Failed to read hydrograph {:?}", path))?;
    info!("Loaded {} inflow records from {:?}", hydrograph.len(), path);
    Ok(hydrograph)
}

// Create CSV writer with headers
pub fn create_csv_writer(path: &Path, pollutants: &[String]) -> Result<Writer<File>> {
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;

    let mut header = vec![
        "step".to_string(),
        "time".to_string(),
        "kind".to_string(),
        "id".to_string(),
        "flow".to_string(),
    ];
    header.extend(pollutants.iter().cloned());
    wtr.write_record(&header)?;

    Ok(wtr)
}

/// Write one row per link and per node for the current step.
pub fn write_step<E: HydraulicEngine, W: std::io::Write>(
    wtr: &mut Writer<W>,
    step: usize,
    time: &NaiveDateTime,
    engine: &E,
) -> Result<()> {
    let time = time.format("%Y-%m-%d %H:%M:%S").to_string();
    let pollutants = engine.pollutant_count();

    for id in engine.link_ids() {
        let mut record = vec![
            step.to_string(),
            time.clone(),
            "link".to_string(),
            id.clone(),
            engine.link_flow(&id)?.to_string(),
        ];
        for p in 0..pollutants {
            record.push(engine.link_quality(&id, p)?.to_string());
        }
        wtr.write_record(&record)?;
    }

    for id in engine.node_ids() {
        let mut record = vec![
            step.to_string(),
            time.clone(),
            "node".to_string(),
            id.clone(),
            engine.node_inflow(&id)?.to_string(),
        ];
        for p in 0..pollutants {
            record.push(engine.node_quality(&id, p)?.to_string());
        }
        wtr.write_record(&record)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pollutants() -> Vec<String> {
        vec!["P1".to_string(), "P2".to_string()]
    }

    #[test]
    fn reads_hydrograph_columns_by_name() {
        let data = "time,P1,flow\n0,10,0.0\n60,12,1.5\n120,10,0.0\n";
        let hydrograph = read_hydrograph(data.as_bytes(), &pollutants()).unwrap();

        assert_eq!(hydrograph.len(), 3);
        assert_eq!(hydrograph.sample(60.0, 2), (1.5, vec![12.0, 0.0]));
        assert_eq!(hydrograph.sample(90.0, 2), (0.75, vec![11.0, 0.0]));
    }

    #[test]
    fn missing_flow_column_is_an_error() {
        let data = "time,P1\n0,10\n";
        assert!(read_hydrograph(data.as_bytes(), &pollutants()).is_err());
    }

    #[test]
    fn bad_number_is_an_error() {
        let data = "time,flow\n0,abc\n";
        assert!(read_hydrograph(data.as_bytes(), &pollutants()).is_err());
    }

    #[test]
    fn writer_emits_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let mut wtr = create_csv_writer(&path, &pollutants()).unwrap();
        wtr.flush().unwrap();
        drop(wtr);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next(), Some("step,time,kind,id,flow,P1,P2"));
    }
}
