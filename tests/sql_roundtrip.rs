use hayrick::datatype::{DateTimeTz, Value};
use hayrick::filter::Filter;
use hayrick::persist::SqlStore;
use hayrick::provider::Provider;
use hayrick::sql::{self, Postgres, SqlBind, Sqlite};
use hayrick::zinc;

fn corpus() -> hayrick::Grid {
    zinc::parse_grid(
        "ver:\"3.0\"\n\
         id,site,equip,point,area,dis,geoCity,siteRef,curVal,on,level\n\
         @id1,M,,,100ft\u{b2},\"Dis 1\",\"Richmond\",,,T,75%\n\
         @id2,,M,,40ft\u{b2},\"Dis 2\",,@id1,,F,60kW\n\
         @id3,,,M,,\"Dis 3\",,@id1,10kW,,\n\
         @id4,M,,,100m\u{b2},\"Dis 1\",\"Oslo\",,,,25%\n",
    )
    .unwrap()
}

fn store_with(grid: &hayrick::Grid) -> SqlStore {
    let store = SqlStore::in_memory("haystack").unwrap();
    let version = DateTimeTz::now();
    store.update_grid(grid, &version).unwrap();
    store
}

fn row_ids(grid: &hayrick::Grid) -> Vec<String> {
    grid.rows()
        .iter()
        .map(|row| match row.get("id") {
            Some(Value::Ref(r)) => r.name().to_string(),
            other => panic!("row without id: {other:?}"),
        })
        .collect()
}

/// The set selected in memory equals the set selected through translated
/// SQL, for every filter in the list.
#[test]
fn sql_selection_matches_in_memory_evaluation() {
    let grid = corpus();
    let store = store_with(&grid);
    let filters = [
        "site",
        "not site",
        "on",
        "equip and area < 50ft\u{b2}",
        "area >= 50ft\u{b2}",
        "dis == \"Dis 1\"",
        "dis != \"Dis 1\"",
        "id == @id1",
        "id != @id1",
        "curVal == 10kW or site",
        "on == true",
        "on == false",
        // A % unit must not read as a pattern wildcard in the translated
        // unit guard.
        "level >= 50%",
        "level < 50%",
        "level == 75%",
        "geoCity == \"Richmond\" and site",
        "siteRef->geoCity == \"Richmond\"",
        "site or siteRef->geoCity == \"Richmond\"",
        "siteRef->area >= 50ft\u{b2}",
        "missingTag == 5",
    ];
    for source in filters {
        let filter = Filter::parse(source).unwrap();
        let expected: Vec<String> = filter
            .filter_grid(&grid)
            .map(|row| match row.get("id") {
                Some(Value::Ref(r)) => r.name().to_string(),
                _ => unreachable!(),
            })
            .collect();
        let selected = store.read(Some(source), 0, None, None).unwrap();
        assert_eq!(
            row_ids(&selected),
            expected,
            "SQL and evaluator disagree on {source:?}"
        );
    }
}

#[test]
fn scenario_clause_shape_for_sqlite() {
    let filter = Filter::parse("site and area >= 50ft\u{b2}").unwrap();
    let t = sql::translate(&filter, &Sqlite, "haystack").unwrap();
    assert!(t.clause.contains("json_extract(entity,'$.site') IS NOT NULL"));
    assert!(t.clause.contains("json_extract(entity,'$.site') <> 'false'"));
    assert!(t
        .clause
        .contains("CAST(SUBSTR(json_extract(entity,'$.area'),3) AS REAL) >= ?"));
    assert_eq!(t.binds[0], SqlBind::Real(50.0));
    assert_eq!(t.binds[1], SqlBind::Text("ft\u{b2}".to_string()));
}

#[test]
fn dialects_differ_only_in_syntax() {
    let filter = Filter::parse("dis == \"x\" and area > 1m").unwrap();
    let sqlite = sql::translate(&filter, &Sqlite, "h").unwrap();
    let postgres = sql::translate(&filter, &Postgres, "h").unwrap();
    assert!(sqlite.clause.contains("json_extract(entity,'$.dis') = ?"));
    assert!(postgres.clause.contains("(entity ->> 'dis') = $1"));
    assert_eq!(sqlite.binds, postgres.binds);
}

#[test]
fn inexact_translations_are_flagged_and_reverified() {
    let filter = Filter::parse("site or siteRef->geoCity == \"Richmond\"").unwrap();
    let t = sql::translate(&filter, &Sqlite, "haystack").unwrap();
    assert!(!t.exact);
    // The store still answers correctly by re-verifying in process.
    let grid = corpus();
    let store = store_with(&grid);
    let selected = store
        .read(Some("site or siteRef->geoCity == \"Richmond\""), 0, None, None)
        .unwrap();
    assert_eq!(row_ids(&selected), vec!["id1", "id2", "id3", "id4"]);
}

#[test]
fn limit_and_select_narrow_the_result() {
    let grid = corpus();
    let store = store_with(&grid);
    let limited = store.read(Some("dis == \"Dis 1\""), 1, None, None).unwrap();
    assert_eq!(limited.len(), 1);
    let narrowed = store.read(None, 0, Some("id,dis"), None).unwrap();
    assert_eq!(
        narrowed.column_names().collect::<Vec<_>>(),
        vec!["id", "dis"]
    );
    assert_eq!(narrowed.row(0).unwrap().get("site"), None);
}
