//! Transform stage: `lines.ndjson` → resolved addresses → graph objects
//!
//! Street lookups for several entries run at once on blocking threads, but
//! results are consumed in input order and written to the sink one object at
//! a time, so identical input always produces identical output.

use super::graph::{
    GeocodedAddress, Geocoder, Geometry, GraphObject, LogEntry, PersonData, PersonObject, Relation,
    IN_RELATION, PERSON_TYPE,
};
use super::progress::ProgressCounter;
use super::sink::GraphSink;
use super::{PipelineError, Stage};
use crate::config::Config;
use crate::resolver::{BasicNormalizer, ResolvedAddress, ResolverError, ResolverOptions, StreetIndex};
use crate::types::{Location, ParsedLine};
use crate::util::clip;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Transform statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Input lines read (blank lines excluded)
    pub lines: u64,
    /// Lines that could not be decoded
    pub malformed: u64,
    pub persons: u64,
    pub relations: u64,
    pub logs: u64,
}

impl TransformStats {
    fn count(&mut self, object: &GraphObject) {
        match object {
            GraphObject::Object(_) => self.persons += 1,
            GraphObject::Relation(_) => self.relations += 1,
            GraphObject::Log(_) => self.logs += 1,
        }
    }

    pub fn print_summary(&self) {
        println!("\nTransform Summary");
        println!("=================");
        println!("Lines read:          {}", self.lines);
        println!("Malformed lines:     {}", self.malformed);
        println!("Persons:             {}", self.persons);
        println!("Relations:           {}", self.relations);
        println!("Log objects:         {}", self.logs);
    }
}

/// Outcome of looking up one address fragment
#[derive(Debug, Clone)]
pub struct Lookup {
    pub location: Location,
    pub resolved: Option<ResolvedAddress>,
    /// Only attempted for resolved addresses when a geocoder is configured
    pub geocoded: Option<Result<GeocodedAddress, String>>,
}

/// One input line after decoding and lookup
enum Prepared {
    Blank,
    Malformed { line: u64, error: String },
    Entry { entry: ParsedLine, lookups: Vec<Lookup> },
}

/// Runs the transform stage
pub struct TransformStage {
    index: Arc<StreetIndex>,
    geocoder: Option<Arc<dyn Geocoder>>,
    lookup_concurrency: usize,
    log_every_lines: u64,
}

impl TransformStage {
    pub fn new(index: Arc<StreetIndex>, config: &Config) -> Self {
        Self {
            index,
            geocoder: None,
            lookup_concurrency: config.resolver.lookup_concurrency.max(1),
            log_every_lines: config.pipeline.log_every_lines,
        }
    }

    /// Build the street index from `resolver.streets` with the default normalizer
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let streets = config
            .resolver
            .streets
            .as_ref()
            .ok_or_else(|| PipelineError::Configuration {
                stage: Stage::Transform,
                message: "resolver.streets is not set".to_string(),
            })?;

        let index = StreetIndex::from_file(
            streets,
            Arc::new(BasicNormalizer::new()),
            ResolverOptions::from(&config.resolver),
        )
        .map_err(|e| PipelineError::Configuration {
            stage: Stage::Transform,
            message: e.to_string(),
        })?;

        Ok(Self::new(Arc::new(index), config))
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Transform every parsed line in `input` and write the objects to `sink`
    pub async fn run<S: GraphSink + ?Sized>(
        &self,
        input: &Path,
        sink: &mut S,
    ) -> Result<TransformStats, PipelineError> {
        let file = File::open(input)
            .await
            .map_err(|e| PipelineError::io(Stage::Transform, input, e))?;
        let lines = BufReader::new(file).lines();

        info!("Transforming {}", input.display());

        let numbered = stream::try_unfold((lines, 0u64), |(mut lines, number)| async move {
            Ok::<_, std::io::Error>(
                lines
                    .next_line()
                    .await?
                    .map(|line| ((number + 1, line), (lines, number + 1))),
            )
        });

        let prepared = numbered
            .map(|item| async move {
                let (number, line) =
                    item.map_err(|e| PipelineError::io(Stage::Transform, input, e))?;
                self.prepare(number, line).await
            })
            .buffered(self.lookup_concurrency);
        futures::pin_mut!(prepared);

        let mut stats = TransformStats::default();
        let mut progress = ProgressCounter::new("lines", self.log_every_lines);

        while let Some(item) = prepared.next().await {
            let (record, objects) = match item? {
                Prepared::Blank => continue,
                Prepared::Malformed { line, error } => {
                    stats.malformed += 1;
                    let log = LogEntry {
                        id: None,
                        error,
                        value: None,
                        line: Some(line),
                    };
                    (format!("line {}", line), vec![GraphObject::Log(log)])
                }
                Prepared::Entry { entry, lookups } => {
                    (entry.line.record_id(), build_objects(&entry, lookups))
                }
            };

            stats.lines += 1;
            progress.tick();

            for object in &objects {
                sink.write_object(object)
                    .await
                    .map_err(|source| PipelineError::Sink {
                        stage: Stage::Transform,
                        record: record.clone(),
                        source,
                    })?;
                stats.count(object);
            }
        }

        sink.flush().await.map_err(|source| PipelineError::Sink {
            stage: Stage::Transform,
            record: "final flush".to_string(),
            source,
        })?;

        info!(
            "Transformed {} lines: {} persons, {} relations, {} log objects",
            stats.lines, stats.persons, stats.relations, stats.logs
        );
        Ok(stats)
    }

    async fn prepare(&self, number: u64, line: String) -> Result<Prepared, PipelineError> {
        if line.trim().is_empty() {
            return Ok(Prepared::Blank);
        }

        let entry: ParsedLine = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping malformed line {}: {} ({})", number, e, clip(&line, 80));
                return Ok(Prepared::Malformed {
                    line: number,
                    error: format!("malformed record: {}", e),
                });
            }
        };

        let record_id = entry.line.record_id();
        let index = self.index.clone();
        let geocoder = self.geocoder.clone();
        let locations = entry.parsed.locations.clone();

        let lookups = tokio::task::spawn_blocking(move || {
            lookup_locations(&index, geocoder.as_deref(), locations)
        })
        .await
        .map_err(|e| PipelineError::Task {
            stage: Stage::Transform,
            message: e.to_string(),
        })?
        .map_err(|source| PipelineError::Resolver {
            record: record_id,
            source,
        })?;

        Ok(Prepared::Entry { entry, lookups })
    }
}

/// Resolve, then geocode, every location of one entry
pub fn lookup_locations(
    index: &StreetIndex,
    geocoder: Option<&dyn Geocoder>,
    locations: Vec<Location>,
) -> Result<Vec<Lookup>, ResolverError> {
    locations
        .into_iter()
        .map(|location| {
            let resolved = index.resolve(&location.value)?;
            let geocoded = match (&resolved, geocoder) {
                (Some(address), Some(geocoder)) => Some(geocoder.geocode(address)),
                _ => None,
            };
            Ok(Lookup {
                location,
                resolved,
                geocoded,
            })
        })
        .collect()
}

/// Graph objects for one entry: the person (if any) and its relations, then logs
pub fn build_objects(entry: &ParsedLine, lookups: Vec<Lookup>) -> Vec<GraphObject> {
    let id = entry.line.record_id();
    let subject = entry.parsed.main_subject();

    let mut logs: Vec<LogEntry> = Vec::new();
    if subject.is_none() {
        logs.push(LogEntry::new(&id, "no subject"));
    }
    if entry.parsed.locations.is_empty() {
        logs.push(LogEntry::new(&id, "no locations"));
    }

    let mut addresses: Vec<ResolvedAddress> = Vec::new();
    let mut geocoded: Vec<GeocodedAddress> = Vec::new();
    for lookup in lookups {
        let Some(address) = lookup.resolved else {
            logs.push(LogEntry::new(&id, "address not resolved").with_value(lookup.location.value));
            continue;
        };

        match lookup.geocoded {
            Some(Ok(found)) => geocoded.push(found),
            Some(Err(message)) => logs.push(LogEntry::new(&id, message).with_value(address.to_string())),
            None => {}
        }
        addresses.push(address);
    }

    let mut objects = Vec::new();
    match subject {
        Some(subject) if !addresses.is_empty() => {
            let points: Vec<[f64; 2]> = geocoded.iter().map(|g| g.coordinates).collect();
            let relations: Vec<GraphObject> = geocoded
                .iter()
                .map(|g| {
                    GraphObject::Relation(Relation {
                        from: id.clone(),
                        to: g.id.clone(),
                        kind: IN_RELATION.to_string(),
                    })
                })
                .collect();

            let line = &entry.line;
            objects.push(GraphObject::Object(PersonObject {
                id: id.clone(),
                kind: PERSON_TYPE.to_string(),
                name: subject.value.clone(),
                valid_since: line.year.min(),
                valid_until: line.year.max(),
                data: PersonData {
                    volume_uuid: line.uuid.clone(),
                    page_uuid: line.page_uuid.clone(),
                    page_num: line.page_num,
                    bbox: line.bbox,
                    text: line.text.clone(),
                    occupation: subject.occupation.clone(),
                    locations: entry.parsed.locations.clone(),
                    addresses,
                    geocoded,
                },
                geometry: Geometry::from_points(&points),
            }));
            objects.extend(relations);
        }
        _ => debug!("No person for {}", id),
    }

    objects.extend(logs.into_iter().map(GraphObject::Log));
    objects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sink::SinkError;
    use crate::types::{LineRecord, ParsedFields, Subject, SubjectKind, Year};
    use async_trait::async_trait;
    use tempfile::TempDir;

    #[derive(Default)]
    struct VecSink {
        objects: Vec<GraphObject>,
    }

    #[async_trait]
    impl GraphSink for VecSink {
        async fn write_object(&mut self, object: &GraphObject) -> Result<(), SinkError> {
            self.objects.push(object.clone());
            Ok(())
        }
    }

    struct FixedGeocoder;

    impl Geocoder for FixedGeocoder {
        fn geocode(&self, address: &ResolvedAddress) -> Result<GeocodedAddress, String> {
            if address.number == "0" {
                return Err("no such house number".to_string());
            }
            Ok(GeocodedAddress {
                id: format!("address/{}/{}", address.street_id, address.number),
                address: address.to_string(),
                coordinates: [-74.0, 40.7],
            })
        }
    }

    fn index() -> Arc<StreetIndex> {
        Arc::new(
            StreetIndex::build(
                ["Broadway", "Bowery"],
                Arc::new(BasicNormalizer::new()),
                ResolverOptions::default(),
            )
            .unwrap(),
        )
    }

    fn entry(subjects: &[&str], locations: &[&str]) -> ParsedLine {
        ParsedLine {
            line: LineRecord {
                uuid: "vol".to_string(),
                year: Year::Range(1850, 1851),
                image_id: "56886389".to_string(),
                page_uuid: "c6725860".to_string(),
                page_num: 25,
                bbox: [100, 200, 900, 230],
                text: "Smith John, carpenter, 123 Bway".to_string(),
            },
            parsed: ParsedFields {
                subjects: subjects
                    .iter()
                    .map(|value| Subject {
                        kind: SubjectKind::Primary,
                        value: value.to_string(),
                        occupation: Some("carpenter".to_string()),
                    })
                    .collect(),
                locations: locations
                    .iter()
                    .map(|value| Location {
                        value: value.to_string(),
                    })
                    .collect(),
            },
        }
    }

    fn objects_for(entry: &ParsedLine, geocoder: Option<&dyn Geocoder>) -> Vec<GraphObject> {
        let lookups = lookup_locations(&index(), geocoder, entry.parsed.locations.clone()).unwrap();
        build_objects(entry, lookups)
    }

    #[test]
    fn test_person_with_resolved_address() {
        let objects = objects_for(&entry(&["John Smith"], &["123 Bway"]), None);

        assert_eq!(objects.len(), 1);
        let GraphObject::Object(person) = &objects[0] else {
            panic!("expected a person, got {:?}", objects[0]);
        };
        assert_eq!(person.id, "1850-1851.25.100-200-900-230");
        assert_eq!(person.kind, "st:Person");
        assert_eq!(person.name, "John Smith");
        assert_eq!((person.valid_since, person.valid_until), (1850, 1851));
        assert_eq!(person.data.occupation.as_deref(), Some("carpenter"));
        assert_eq!(person.data.addresses[0].to_string(), "123 Broadway");
        assert!(person.geometry.is_none());
    }

    #[test]
    fn test_unresolved_address_only_logs() {
        let objects = objects_for(&entry(&["John Smith"], &["Bway"]), None);

        assert_eq!(
            objects,
            vec![GraphObject::Log(
                LogEntry::new("1850-1851.25.100-200-900-230", "address not resolved").with_value("Bway")
            )]
        );
    }

    #[test]
    fn test_partial_resolution_keeps_person_and_logs_miss() {
        let objects = objects_for(&entry(&["John Smith"], &["9 Nowhere Lane", "5 Bowery"]), None);

        assert_eq!(objects.len(), 2);
        assert!(matches!(&objects[0], GraphObject::Object(p) if p.data.addresses.len() == 1));
        assert!(matches!(&objects[1], GraphObject::Log(log) if log.value.as_deref() == Some("9 Nowhere Lane")));
    }

    #[test]
    fn test_missing_subject_or_locations() {
        let objects = objects_for(&entry(&[], &[]), None);
        let errors: Vec<&str> = objects
            .iter()
            .map(|o| match o {
                GraphObject::Log(log) => log.error.as_str(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(errors, vec!["no subject", "no locations"]);
    }

    #[test]
    fn test_geocoded_addresses_add_relations_and_geometry() {
        let geocoder = FixedGeocoder;
        let objects = objects_for(&entry(&["John Smith"], &["123 Bway", "0 Bowery"]), Some(&geocoder));

        assert_eq!(objects.len(), 3);
        let GraphObject::Object(person) = &objects[0] else {
            panic!("expected a person");
        };
        assert_eq!(person.geometry, Some(Geometry::Point([-74.0, 40.7])));
        assert_eq!(person.data.addresses.len(), 2);
        assert_eq!(person.data.geocoded.len(), 1);

        assert!(matches!(&objects[1], GraphObject::Relation(r) if r.kind == "st:in" && r.to == "address/0/123"));
        assert!(matches!(&objects[2], GraphObject::Log(log) if log.error == "no such house number"));
    }

    #[tokio::test]
    async fn test_run_skips_blank_and_logs_malformed_lines() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("lines.ndjson");
        let good = serde_json::to_string(&entry(&["John Smith"], &["123 Bway"])).unwrap();
        std::fs::write(&input, format!("{}\n\n{{\"uuid\": 1}}\n", good)).unwrap();

        let stage = TransformStage::new(index(), &Config::default());
        let mut sink = VecSink::default();
        let stats = stage.run(&input, &mut sink).await.unwrap();

        assert_eq!(stats.lines, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.persons, 1);
        assert_eq!(stats.logs, 1);
        assert!(matches!(&sink.objects[1], GraphObject::Log(log) if log.line == Some(3)));
    }

    #[tokio::test]
    async fn test_run_preserves_input_order() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("lines.ndjson");

        let mut content = String::new();
        for i in 0..50u32 {
            let mut e = entry(&[&format!("Person {}", i)], &[&format!("{} Broadway", i + 1)]);
            e.line.page_num = i;
            content.push_str(&serde_json::to_string(&e).unwrap());
            content.push('\n');
        }
        std::fs::write(&input, content).unwrap();

        let mut config = Config::default();
        config.resolver.lookup_concurrency = 8;
        let stage = TransformStage::new(index(), &config);
        let mut sink = VecSink::default();
        stage.run(&input, &mut sink).await.unwrap();

        let names: Vec<String> = sink
            .objects
            .iter()
            .filter_map(|o| match o {
                GraphObject::Object(p) => Some(p.name.clone()),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..50).map(|i| format!("Person {}", i)).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_from_config_requires_street_list() {
        let result = TransformStage::from_config(&Config::default());
        assert!(matches!(result, Err(PipelineError::Configuration { .. })));
    }
}
