use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hayrick::filter::Filter;
use hayrick::{json, zinc};

fn synthetic_grid(rows: usize) -> String {
    let mut src = String::from("ver:\"3.0\" dis:\"bench\"\nid,site,area,dis,when\n");
    for i in 0..rows {
        src.push_str(&format!(
            "@e{i},{marker},{area}ft\u{b2},\"Entity {i}\",2021-06-01T12:00:00Z UTC\n",
            marker = if i % 2 == 0 { "M" } else { "" },
            area = 10 + (i % 500),
        ));
    }
    src
}

pub fn criterion_benchmark(c: &mut Criterion) {
    for rows in [100usize, 1_000, 10_000] {
        let src = synthetic_grid(rows);
        let grid = zinc::parse_grid(&src).unwrap();

        c.bench_function(&format!("zinc parse {rows}"), |b| {
            b.iter(|| zinc::parse_grid(black_box(&src)).unwrap())
        });
        c.bench_function(&format!("zinc emit {rows}"), |b| {
            b.iter(|| zinc::dump_grid(black_box(&grid)).unwrap())
        });
        c.bench_function(&format!("json emit {rows}"), |b| {
            b.iter(|| json::dump_grid(black_box(&grid)).unwrap())
        });

        let filter = Filter::parse("site and area >= 50ft\u{b2}").unwrap();
        c.bench_function(&format!("filter eval {rows}"), |b| {
            b.iter(|| filter.filter_grid(black_box(&grid)).count())
        });
    }

    c.bench_function("filter parse", |b| {
        b.iter(|| {
            Filter::parse(black_box(
                "site and (area >= 50ft\u{b2} or siteRef->geoCity == \"Richmond\")",
            ))
            .unwrap()
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
