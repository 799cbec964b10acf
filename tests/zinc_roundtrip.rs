use hayrick::datatype::Value;
use hayrick::error::{Error, ParseErrorKind};
use hayrick::zinc;

fn round_trip(src: &str) {
    let grid = zinc::parse_grid(src).expect("parse");
    let out = zinc::dump_grid(&grid).expect("dump");
    assert_eq!(out, src, "emit must reproduce the source byte for byte");
    let again = zinc::parse_grid(&out).expect("reparse");
    assert_eq!(again, grid);
}

#[test]
fn parse_emit_identity() {
    round_trip("ver:\"3.0\"\nname,age\n\"Alice\",N\n\"Bob\",30\n");
}

#[test]
fn scenario_grid_shape() {
    let grid = zinc::parse_grid("ver:\"3.0\"\nname,age\n\"Alice\",N\n\"Bob\",30\n").unwrap();
    assert_eq!(grid.len(), 2);
    assert_eq!(grid.column_names().collect::<Vec<_>>(), vec!["name", "age"]);
    assert_eq!(grid.row(0).unwrap().get("age"), Some(&Value::Null));
    assert_eq!(grid.row(1).unwrap().get("age"), Some(&Value::number(30.0)));
}

#[test]
fn corpus_round_trips() {
    let corpus = [
        "ver:\"3.0\"\nid\n@a\n",
        "ver:\"3.0\" dis:\"Sites\" site\nid,geoCoord,dis\n@s1,C(37.5458,-77.4491),\"Main\"\n",
        "ver:\"3.0\"\na,b,c\nM,R,NA\nT,F,N\n",
        "ver:\"3.0\"\nnums\n1\n-2.5\n1000\n0.125\n154kg\n75%\nINF\n-INF\nNaN\n",
        "ver:\"3.0\"\nstrs,uris\n\"a\\nb\\\"c\\\\d\\$e\",`http://x/?q=1`\n",
        "ver:\"3.0\"\nwhen,day,tod\n2021-01-01T12:00:00-05:00 New_York,2021-01-01,09:30:00\n",
        "ver:\"3.0\"\nlist,dict\n[1,\"two\",@three],{site dis:\"D\" area:10ft\u{b2}}\n",
        "ver:\"3.0\"\nrefs\n@a \"Display\"\n",
        "ver:\"3.0\"\nxs\nColor(\"red\")\n",
        "ver:\"3.0\"\ninner\n<<ver:\"3.0\"\nv\n1\n2\n>>\n",
        "ver:\"3.0\"\nempty,full\n,N\n",
    ];
    for src in corpus {
        round_trip(src);
    }
}

#[test]
fn idempotent_emit() {
    let src = "ver:\"3.0\" site\nid,area,ts\n@a,154kg,2021-06-01T00:00:00Z UTC\n@b,,\n";
    let grid = zinc::parse_grid(src).unwrap();
    let once = zinc::dump_grid(&grid).unwrap();
    let twice = zinc::dump_grid(&zinc::parse_grid(&once).unwrap()).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn nan_round_trips_as_equal_value() {
    let grid = zinc::parse_grid("ver:\"3.0\"\nv\nNaN\n").unwrap();
    let again = zinc::parse_grid(&zinc::dump_grid(&grid).unwrap()).unwrap();
    // NaN != NaN as floats, but Value equality is bit-identical.
    assert_eq!(grid, again);
    assert_eq!(grid.row(0).unwrap().get("v"), Some(&Value::number(f64::NAN)));
}

#[test]
fn empty_cell_differs_from_empty_string() {
    let grid = zinc::parse_grid("ver:\"3.0\"\na,b\n,\"\"\n").unwrap();
    let row = grid.row(0).unwrap();
    assert_eq!(row.get("a"), None);
    assert_eq!(row.get("b"), Some(&Value::str("")));
}

#[test]
fn missing_tz_suffix_is_rejected() {
    let err = zinc::parse_grid("ver:\"3.0\"\nts\n2021-01-01T00:00:00Z\n").unwrap_err();
    match err {
        Error::Parse { kind, line, .. } => {
            assert_eq!(kind, ParseErrorKind::MissingTz);
            assert_eq!(line, 3);
        }
        other => panic!("expected parse error, got {other}"),
    }
}

#[test]
fn error_kinds_carry_positions() {
    let cases: [(&str, ParseErrorKind); 5] = [
        ("ver:\"3.0\"\na,a\n", ParseErrorKind::DuplicateColumn),
        ("ver:\"3.0\"\ns\n\"oops\n", ParseErrorKind::UnterminatedString),
        ("ver:\"3.0\"\ns\n\"a\\qb\"\n", ParseErrorKind::BadEscape),
        ("ver:\"3.0\"\nv\nQQQ\n", ParseErrorKind::UnknownScalar),
        ("ver:\"3.0\"\nv\n2021-13-45\n", ParseErrorKind::BadNumber),
    ];
    for (src, expected) in cases {
        match zinc::parse_grid(src) {
            Err(Error::Parse { kind, line, col }) => {
                assert_eq!(kind, expected, "for {src:?}");
                assert!(line > 0 && col > 0);
            }
            other => panic!("expected {expected:?} for {src:?}, got {other:?}"),
        }
    }
}

#[test]
fn missing_version_header_is_an_error() {
    assert!(zinc::parse_grid("nope\n").is_err());
    assert!(matches!(
        zinc::parse_grid("ver:\"9.0\"\na\n"),
        Err(Error::Schema(_))
    ));
}

#[test]
fn version_two_is_accepted_but_restricted() {
    let grid = zinc::parse_grid("ver:\"2.0\"\nid,v\n@a,1\n").unwrap();
    assert_eq!(grid.len(), 1);
    assert!(zinc::parse_grid("ver:\"2.0\"\nv\n{a:1}\n").is_err());
    // The emitter always writes 3.0.
    assert!(zinc::dump_grid(&grid).unwrap().starts_with("ver:\"3.0\"\n"));
}

#[test]
fn deadline_is_honoured_at_row_boundaries() {
    let mut src = String::from("ver:\"3.0\"\nv\n");
    for i in 0..10_000 {
        src.push_str(&i.to_string());
        src.push('\n');
    }
    let options = zinc::ParseOptions {
        deadline: Some(std::time::Instant::now() - std::time::Duration::from_secs(1)),
    };
    assert!(matches!(
        zinc::parse_grid_with(&src, &options),
        Err(Error::Data(_))
    ));
}
