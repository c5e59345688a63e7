//! End-to-end: download over HTTP, extract, commit, then aggregate

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use termhub_ingest::aggregate::{AggregateOptions, Aggregator};
use termhub_ingest::config::IngestConfig;
use termhub_ingest::error::IngestError;
use termhub_ingest::pipeline::{Branch, Codec, Recipe, Step};
use termhub_ingest::records::DmpReader;
use termhub_ingest::resources::transforms::join_taxonomy;
use termhub_ingest::resources::{Registry, ResourceDescriptor};
use termhub_ingest::statlog::StatLog;
use termhub_ingest::update::{UpdateOptions, UpdateOutcome, Updater};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NAMES: &str = "9606\t|\tHomo sapiens\t|\t\t|\tscientific name\t|\n\
                     9606\t|\thuman\t|\t\t|\tgenbank common name\t|\n";
const NODES: &str = "9606\t|\t9605\t|\tspecies\t|\tHS\t|\t5\t|\n";

fn taxdump() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    // nodes first: the merge must still see names, nodes in declaration order
    for (name, data) in [("nodes.dmp", NODES), ("names.dmp", NAMES)] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_bytes()).unwrap();
    }
    let tar = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

fn setup(server: &MockServer, dir: &Path) -> (Arc<IngestConfig>, Arc<Registry>) {
    let recipe = Recipe::new(
        format!("{}/taxdump.tar.gz", server.uri()),
        vec![
            Step::Decompress(Codec::Gz),
            Step::Decompress(Codec::Tar),
            Step::Fork(vec![
                Branch::new("names.dmp", vec![]),
                Branch::new("nodes.dmp", vec![]),
            ]),
            Step::Merge(join_taxonomy),
            Step::write("taxonomy.dmp"),
        ],
    )
    .unwrap();

    let mut registry = Registry::new();
    registry.register(ResourceDescriptor {
        name: "taxonomy",
        resource_label: "NCBI Taxonomy",
        entity_type: "organism",
        recipes: vec![recipe],
        reader: Arc::new(DmpReader),
        uri_prefix: None,
        reference: None,
        missing_credential: None,
    });
    (
        Arc::new(IngestConfig::with_dump_dir(dir)),
        Arc::new(registry),
    )
}

#[tokio::test]
async fn test_update_then_aggregate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/taxdump.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(taxdump()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (config, registry) = setup(&server, dir.path());
    let updater = Updater::new(Arc::clone(&config), Arc::clone(&registry)).unwrap();

    let outcome = updater.update("taxonomy", &UpdateOptions::default()).await.unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            files: vec![dir.path().join("taxonomy.dmp")]
        }
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("taxonomy.dmp")).unwrap(),
        "9606\tscientific name\tHomo sapiens\n9606\tgenbank common name\thuman\n"
    );
    assert!(!dir.path().join("taxonomy.dmp.tmp").exists());

    let log = StatLog::load(dir.path(), "taxonomy", &[]).unwrap();
    assert!(log.modified.is_some());
    assert!(!log.changed);

    // fetched moments ago: no second download
    let outcome = updater.update("taxonomy", &UpdateOptions::default()).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::UpToDate);

    let aggregator = Aggregator::new(config, registry);
    let mut out = Vec::new();
    let report = aggregator
        .run(
            &AggregateOptions {
                resources: vec!["taxonomy".to_string()],
                ..AggregateOptions::default()
            },
            &mut out,
        )
        .unwrap();
    assert_eq!(report.rows_written, 2);
    let table = String::from_utf8(out).unwrap();
    assert!(table.contains("CUI-less\tNCBI Taxonomy\t9606\thuman\tHomo sapiens\torganism\r\n"));
}

#[tokio::test]
async fn test_failed_download_keeps_previous_dump() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/taxdump.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not gzip at all".to_vec()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/taxdump.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(taxdump()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("taxonomy.dmp"), "old").unwrap();
    let (config, registry) = setup(&server, dir.path());
    StatLog::load(dir.path(), "taxonomy", &[])
        .unwrap()
        .mark_fetched_at(1_000, Vec::<(String, Option<u64>)>::new())
        .unwrap();

    let updater = Updater::new(config, registry).unwrap();
    let options = UpdateOptions {
        force: true,
        ..UpdateOptions::default()
    };
    let err = updater.update("taxonomy", &options).await.unwrap_err();
    assert!(matches!(err, IngestError::DownloadFailed { .. }));

    assert_eq!(fs::read_to_string(dir.path().join("taxonomy.dmp")).unwrap(), "old");
    assert!(!dir.path().join("taxonomy.dmp.tmp").exists());
    let log = StatLog::load(dir.path(), "taxonomy", &[dir.path().join("taxonomy.dmp")]).unwrap();
    assert_eq!(log.modified, None);

    // the next regular run downloads again despite the old dump
    let outcome = updater.update("taxonomy", &UpdateOptions::default()).await.unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            files: vec![dir.path().join("taxonomy.dmp")]
        }
    );
    assert!(fs::read_to_string(dir.path().join("taxonomy.dmp"))
        .unwrap()
        .starts_with("9606\t"));
}

#[tokio::test]
async fn test_http_error_is_download_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (config, registry) = setup(&server, dir.path());
    let updater = Updater::new(config, registry).unwrap();

    let err = updater
        .update("taxonomy", &UpdateOptions { force: true, ..UpdateOptions::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::DownloadFailed { .. }));
    assert!(!dir.path().join("taxonomy.dmp").exists());
}
