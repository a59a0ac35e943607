use keg_cdn::{CdnError, StateCache, StatefulResponse};
use tempfile::TempDir;

const CDNS: &str = "\
Name!STRING:0|Path!STRING:0|Hosts!STRING:0|Servers!STRING:0|ConfigPath!STRING:0
## seqn = 2241282
us|tpr/wow|level3.blizzard.com us.cdn.blizzard.com|http://level3.blizzard.com/?maxhosts=4|tpr/configs/data
eu|tpr/wow|eu.cdn.blizzard.com|http://eu.cdn.blizzard.com/?maxhosts=4|tpr/configs/data
";

#[test]
fn write_then_read_round_trips() {
    let tmp = TempDir::new().unwrap();
    let cache = StateCache::new(tmp.path());

    assert!(!cache.exists("responses", "deadbeef"));
    assert_eq!(cache.write("responses", "deadbeef", b"x").unwrap(), 1);
    assert!(cache.exists("responses", "deadbeef"));
    assert_eq!(cache.read("responses", "deadbeef").unwrap(), b"x");

    let on_disk = tmp
        .path()
        .join("responses")
        .join("de")
        .join("ad")
        .join("deadbeef");
    assert_eq!(std::fs::read(on_disk).unwrap(), b"x");
}

#[test]
fn second_write_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let cache = StateCache::new(tmp.path());

    assert_eq!(cache.write("versions", "cafebabe", b"first").unwrap(), 5);
    assert_eq!(cache.write("versions", "cafebabe", b"second").unwrap(), 0);
    assert_eq!(cache.read("versions", "cafebabe").unwrap(), b"first");
}

#[test]
fn missing_entry_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let cache = StateCache::new(tmp.path());

    let err = cache.read("versions", "cafebabe").unwrap_err();
    assert!(
        matches!(err, CdnError::NotFound { .. }),
        "unexpected error: {err:?}"
    );
}

#[test]
fn names_must_be_a_single_path_segment() {
    let tmp = TempDir::new().unwrap();
    let cache = StateCache::new(tmp.path().join("responses"));

    for name in ["..", "a/b", "/abs", ""] {
        let err = cache.write(name, "deadbeef", b"x").unwrap_err();
        assert!(
            matches!(err, CdnError::InvalidPath { .. }),
            "{name:?}: unexpected error: {err:?}"
        );
    }
    assert!(!tmp.path().join("deadbeef").exists());
}

#[test]
fn keys_must_be_hex_digests() {
    let tmp = TempDir::new().unwrap();
    let cache = StateCache::new(tmp.path());

    let err = cache.write("versions", "../../etc", b"x").unwrap_err();
    assert!(
        matches!(err, CdnError::InvalidHash { .. }),
        "unexpected error: {err:?}"
    );
    assert!(!cache.exists("versions", "../../etc"));
}

#[test]
fn stateful_response_is_stored_under_its_digest() {
    let tmp = TempDir::new().unwrap();
    let cache = StateCache::new(tmp.path());

    let response = StatefulResponse::new("cdns", CDNS.as_bytes());
    assert_eq!(response.digest.len(), 64);
    assert_eq!(cache.write_response(&response).unwrap(), CDNS.len());
    assert_eq!(cache.write_response(&response).unwrap(), 0);

    let table = cache.read_psv("cdns", &response.digest).unwrap();
    assert_eq!(table.seqn(), Some(2241282));
    assert_eq!(table.rows().len(), 2);
    assert_eq!(table.rows()[1].get("Name"), Some("eu"));

    assert_eq!(
        cache.read_to_string("cdns", &response.digest).unwrap(),
        CDNS
    );
}

#[test]
fn non_utf8_entry_fails_to_decode() {
    let tmp = TempDir::new().unwrap();
    let cache = StateCache::new(tmp.path());
    cache.write("blob", "0badf00d", &[0xff, 0xfe, 0x00]).unwrap();

    let err = cache.read_to_string("blob", "0badf00d").unwrap_err();
    assert!(
        matches!(err, CdnError::Decode { .. }),
        "unexpected error: {err:?}"
    );
}
