mod common;

use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use assert_matches::assert_matches;
use camino::Utf8Path;
use flate2::read::GzDecoder;
use zip::write::SimpleFileOptions;

use scheme_downloader::app::App;
use scheme_downloader::config::{HostConfigs, TokenTable};
use scheme_downloader::domain::{SchemeMetadata, TokenPair};
use scheme_downloader::error::SchemeError;
use scheme_downloader::http::{ARCHIVE_TIMEOUT, DEFAULT_TIMEOUT};
use scheme_downloader::keycache::KeyCache;
use scheme_downloader::providers::{Downloader, ProviderEndpoints};
use scheme_downloader::retry::RetryPolicy;
use scheme_downloader::store::{METADATA_FILE, PROFILES_FILE, SchemeSidecar};

use common::{MockTransport, Reply, gzip, temp_dir};

const ENTEROBASE: &str = "https://entero.test/schemes/Salmonella.Achtman7GeneMLST";
const ENTEROBASE_CGMLST: &str = "https://entero.test/schemes/Salmonella.cgMLSTv2";
const PUBMLST: &str = "https://rest.test/db/pubmlst_neisseria_seqdef";

fn scheme(raw: &str) -> SchemeMetadata {
    serde_json::from_str(raw).unwrap()
}

fn endpoints() -> ProviderEndpoints {
    ProviderEndpoints {
        enterobase: "https://entero.test/schemes".to_string(),
        ridom: "https://ridom.test/schema".to_string(),
    }
}

fn app(transport: &Arc<MockTransport>, keycache: Option<KeyCache>) -> App {
    App::new(transport.clone(), keycache, RetryPolicy::immediate(3)).with_endpoints(endpoints())
}

fn read_gz(path: &Utf8Path) -> String {
    let mut text = String::new();
    GzDecoder::new(File::open(path.as_std_path()).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    text
}

fn sidecar(dir: &Utf8Path) -> SchemeSidecar {
    serde_json::from_str(&fs::read_to_string(dir.join(METADATA_FILE).as_std_path()).unwrap()).unwrap()
}

fn ridom_loci() -> Vec<u8> {
    ridom_archive(&[
        ("b0002.fasta", ">1\nATG\n>2\natc\n"),
        ("b0001.fasta", ">b0001_1\nGGG\n"),
        ("README.txt", "not a locus"),
    ])
}

fn root_entries(root: &Utf8Path) -> Vec<String> {
    fs::read_dir(root.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

fn enterobase_scheme() -> SchemeMetadata {
    scheme(
        r#"{"shortname": "senterica_1", "host": "enterobase", "scheme_id": "Salmonella.Achtman7GeneMLST", "type": "mlst", "species": "Salmonella enterica"}"#,
    )
}

fn enterobase_routes(transport: &MockTransport, base: &str) {
    let index = r#"<html><body><pre>
<a href="../">../</a>
<a href="aroC.fasta.gz">aroC.fasta.gz</a> 15-Jul-2024 07:44  1.2M
<a href="dnaN.fasta.gz">dnaN.fasta.gz</a> 15-Jul-2024 07:45  1.1M
<a href="profiles.list.gz">profiles.list.gz</a> 15-Jul-2024 07:46  9.0M
</pre></body></html>"#;
    transport
        .on_get(
            &format!("{base}/profiles.list.gz"),
            vec![Reply::ok(gzip("ST\taroC\tdnaN\n1\t1\t2\n2\t3\t2\n"))],
        )
        .on_get(&format!("{base}/"), vec![Reply::ok(index)])
        .on_get(
            &format!("{base}/aroC.fasta.gz"),
            vec![Reply::ok(gzip(">aroC_1\nACGT\n>aroC_2\nacgg\n"))],
        )
        .on_get(
            &format!("{base}/dnaN.fasta.gz"),
            vec![Reply::ok(gzip(">dnaN_1\nTTTT\n>dnaN_x\nAAAA\n>dnaN_2\nTTNN\n"))],
        );
}

fn ridom_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn enterobase_scheme_end_to_end() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    enterobase_routes(&transport, ENTEROBASE);

    let manifest = app(&transport, None)
        .download_schemes(&[enterobase_scheme()], &root)
        .unwrap();

    assert_eq!(manifest.schemes.len(), 1);
    let entry = &manifest.schemes[0];
    assert_eq!(entry.db_path, "mlst_schemes/enterobase_Salmonella.Achtman7GeneMLST");
    assert_eq!(entry.last_updated, "2024-07-15");
    assert_eq!(entry.scheme.extra["species"], "Salmonella enterica");

    let dir = root.join(&entry.db_path);
    assert_eq!(read_gz(&dir.join("aroC.fa.gz")), ">1\nACGT\n>2\nACGG\n");
    assert_eq!(read_gz(&dir.join("dnaN.fa.gz")), ">1\nTTTT\n");
    assert_eq!(
        fs::read_to_string(dir.join(PROFILES_FILE).as_std_path()).unwrap(),
        "ST\taroC\tdnaN\n1\t1\t2\n2\t3\t2\n"
    );
    assert_eq!(
        sidecar(&dir),
        SchemeSidecar {
            last_updated: "2024-07-15".to_string(),
            genes: vec!["aroC".to_string(), "dnaN".to_string()],
        }
    );
}

#[test]
fn cgmlst_profiles_are_read_only_for_their_header() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    enterobase_routes(&transport, ENTEROBASE_CGMLST);

    let rows: String = (1..=5000).map(|st| format!("{st}\t{st}\t{}\n", st * 7)).collect();
    let body = gzip(&rows);
    let mut profiles = gzip("ST\taroC\tdnaN\n");
    profiles.extend_from_slice(&body[..body.len() / 2]);
    let profiles_url = format!("{ENTEROBASE_CGMLST}/profiles.list.gz");
    transport.on_get(&profiles_url, vec![Reply::ok(profiles)]);

    let cgmlst = scheme(
        r#"{"shortname": "senterica_cgmlst", "host": "enterobase", "scheme_id": "Salmonella.cgMLSTv2", "type": "cgmlst"}"#,
    );
    let manifest = app(&transport, None).download_schemes(&[cgmlst], &root).unwrap();

    let entry = &manifest.schemes[0];
    assert_eq!(entry.db_path, "cgmlst_schemes/enterobase_Salmonella.cgMLSTv2");
    let dir = root.join(&entry.db_path);
    assert_eq!(read_gz(&dir.join("aroC.fa.gz")), ">1\nACGT\n>2\nACGG\n");
    assert_eq!(sidecar(&dir).genes, vec!["aroC", "dnaN"]);
    assert!(!dir.join(PROFILES_FILE).as_std_path().exists());
    assert_eq!(transport.count(&profiles_url), 1);
}

#[test]
fn enterobase_bulk_files_get_the_archive_timeout() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    enterobase_routes(&transport, ENTEROBASE);

    app(&transport, None)
        .download_schemes(&[enterobase_scheme()], &root)
        .unwrap();

    for request in transport.requests() {
        let expected = if request.url.ends_with(".gz") {
            ARCHIVE_TIMEOUT
        } else {
            DEFAULT_TIMEOUT
        };
        assert_eq!(request.timeout, expected, "{}", request.url);
    }
    assert_eq!(transport.requests().len(), 4);
}

#[test]
fn repeated_downloads_are_byte_identical() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    enterobase_routes(&transport, ENTEROBASE);
    let mut app = app(&transport, None);
    let locus = root.join("mlst_schemes/enterobase_Salmonella.Achtman7GeneMLST/aroC.fa.gz");

    app.download_schemes(&[enterobase_scheme()], &root).unwrap();
    let first = fs::read(locus.as_std_path()).unwrap();
    app.download_schemes(&[enterobase_scheme()], &root).unwrap();
    let second = fs::read(locus.as_std_path()).unwrap();

    assert_eq!(first, second);
}

#[test]
fn transient_failures_are_retried() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    enterobase_routes(&transport, ENTEROBASE);
    let profiles = format!("{ENTEROBASE}/profiles.list.gz");
    transport.on_get(
        &profiles,
        vec![
            Reply::Failure("connection reset".to_string()),
            Reply::status(503),
            Reply::ok(gzip("ST\taroC\tdnaN\n")),
        ],
    );

    app(&transport, None)
        .download_schemes(&[enterobase_scheme()], &root)
        .unwrap();
    assert_eq!(transport.count(&profiles), 3);
}

#[test]
fn missing_enterobase_timestamp_is_fatal() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    enterobase_routes(&transport, ENTEROBASE);
    transport.on_get(&format!("{ENTEROBASE}/"), vec![Reply::ok("<html>nothing here</html>")]);

    let err = app(&transport, None)
        .download_schemes(&[enterobase_scheme()], &root)
        .unwrap_err();
    assert_matches!(err, SchemeError::TimestampUnavailable(_));
    assert_eq!(transport.count(&format!("{ENTEROBASE}/aroC.fasta.gz")), 0);
}

#[test]
fn unknown_hosts_are_skipped() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "https://ridom.test/schema/123/alleles/",
        vec![Reply::ok(ridom_loci())],
    );

    let ridom = scheme(r#"{"shortname": "ecoli_1", "host": "ridom", "scheme_id": "123"}"#);
    let bogus = scheme(r#"{"shortname": "mystery_1", "host": "bogus"}"#);
    assert_matches!(Downloader::select(&ridom), Ok(Some(Downloader::RidomCgmlst(_))));
    assert_matches!(Downloader::select(&bogus), Ok(None));

    let manifest = app(&transport, None)
        .download_schemes(&[bogus, ridom], &root)
        .unwrap();
    assert_eq!(manifest.schemes.len(), 1);
    assert_eq!(manifest.schemes[0].scheme.shortname, "ecoli_1");
}

#[test]
fn ridom_archive_is_normalized_and_cleaned_up() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "https://ridom.test/schema/123/alleles/",
        vec![Reply::ok(ridom_loci())],
    );

    let manifest = app(&transport, None)
        .download_schemes(
            &[scheme(r#"{"shortname": "ecoli_1", "host": "ridom", "scheme_id": "123"}"#)],
            &root,
        )
        .unwrap();

    let dir = root.join(&manifest.schemes[0].db_path);
    assert_eq!(manifest.schemes[0].db_path, "cgmlst_schemes/ridom_ecoli_123");
    assert_eq!(read_gz(&dir.join("b0001.fa.gz")), ">1\nGGG\n");
    assert_eq!(read_gz(&dir.join("b0002.fa.gz")), ">1\nATG\n>2\nATC\n");
    assert_eq!(sidecar(&dir).genes, vec!["b0001", "b0002"]);
    assert!(!dir.join(PROFILES_FILE).as_std_path().exists());

    assert_eq!(root_entries(&root), vec!["cgmlst_schemes"]);
}

#[test]
fn failed_ridom_locus_leaves_no_scratch_files() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    transport.on_get(
        "https://ridom.test/schema/123/alleles/",
        vec![Reply::ok(ridom_archive(&[("b0001.fasta", ">1\nNNN\n>2\nAC-T\n")]))],
    );

    let err = app(&transport, None)
        .download_schemes(
            &[scheme(r#"{"shortname": "ecoli_1", "host": "ridom", "scheme_id": "123"}"#)],
            &root,
        )
        .unwrap_err();

    assert_matches!(err, SchemeError::NoContigs);
    assert_eq!(root_entries(&root), vec!["cgmlst_schemes"]);
    let dir = root.join("cgmlst_schemes/ridom_ecoli_123");
    assert!(!dir.join("b0001.fa.gz").as_std_path().exists());
    assert!(!dir.join(METADATA_FILE).as_std_path().exists());
}

#[test]
fn pubmlst_scheme_with_cached_session() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    let scheme_url = format!("{PUBMLST}/schemes/1");
    transport
        .on_get(&scheme_url, vec![Reply::ok(r#"{"id": 1, "last_updated": "2023-02-01"}"#)])
        .on_get(
            &format!("{scheme_url}/loci"),
            vec![Reply::ok(format!(
                r#"{{"loci": ["{PUBMLST}/loci/abcZ", "{PUBMLST}/loci/'adk"]}}"#
            ))],
        )
        .on_get(
            &format!("{PUBMLST}/loci/abcZ/alleles_fasta"),
            vec![Reply::ok(">abcZ_1\nACGT\n>abcZ_2\nAC-T\n")],
        )
        .on_get(
            &format!("{PUBMLST}/loci/'adk/alleles_fasta"),
            vec![Reply::ok(">'adk_1\nGGCC\n")],
        )
        .on_get(
            &format!("{scheme_url}/profiles_csv"),
            vec![Reply::ok("ST\tabcZ\tadk\tclonal_complex\n1\t1\t1\tST-1 complex\n")],
        );

    let hosts: HostConfigs = serde_json::from_str(
        r#"{"pubmlst": {"REST_URL": "https://rest.test/db", "WEB_URL": "https://web.test/bigsdb", "AUTH_BASE": "https://web.test"}}"#,
    )
    .unwrap();
    let secrets: TokenTable = serde_json::from_str(
        r#"{"pubmlst": {"consumer": {"TOKEN": "ck", "TOKEN SECRET": "cs"}}}"#,
    )
    .unwrap();
    let mut cache = TokenTable::new();
    let tokens = cache.entry("pubmlst".to_string()).or_default();
    tokens.insert("access".to_string(), TokenPair::new("acc", "acc-secret"));
    tokens.insert("session:neisseria".to_string(), TokenPair::new("ses", "ses-secret"));
    let keycache = KeyCache::new(
        secrets,
        hosts,
        cache,
        root.join("secrets_cache.json"),
        transport.clone(),
        RetryPolicy::immediate(1),
    )
    .unwrap();

    let neisseria = scheme(
        r#"{"shortname": "neisseria_1", "host": "pubmlst", "host_path": "pubmlst_neisseria_seqdef", "scheme_id": 1, "type": "mlst"}"#,
    );
    let manifest = app(&transport, Some(keycache))
        .download_schemes(&[neisseria], &root)
        .unwrap();

    let entry = &manifest.schemes[0];
    assert_eq!(entry.db_path, "mlst_schemes/pubmlst_neisseria_1");
    assert_eq!(entry.last_updated, "2023-02-01");
    let dir = root.join(&entry.db_path);
    assert_eq!(read_gz(&dir.join("abcZ.fa.gz")), ">1\nACGT\n");
    assert_eq!(read_gz(&dir.join("adk.fa.gz")), ">1\nGGCC\n");
    assert_eq!(sidecar(&dir).genes, vec!["abcZ", "adk"]);
    assert!(
        fs::read_to_string(dir.join(PROFILES_FILE).as_std_path())
            .unwrap()
            .starts_with("ST\tabcZ\tadk")
    );
    assert!(
        transport
            .requests()
            .iter()
            .all(|request| request.headers.iter().any(|(name, value)| name == "Authorization"
                && value.contains(r#"oauth_token="ses""#)))
    );
}

#[test]
fn bigsdb_scheme_needs_secrets() {
    let (_temp, root) = temp_dir();
    let transport = Arc::new(MockTransport::new());
    let neisseria = scheme(
        r#"{"shortname": "neisseria_1", "host": "pubmlst", "host_path": "pubmlst_neisseria_seqdef", "scheme_id": 1, "type": "mlst"}"#,
    );
    let err = app(&transport, None)
        .download_schemes(&[neisseria], &root)
        .unwrap_err();
    assert_matches!(err, SchemeError::InvalidScheme { .. });
    assert!(transport.requests().is_empty());
}
