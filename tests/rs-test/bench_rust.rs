use std::io::Write;
use std::time::Instant;

use xdb_rs::{LoaderMode, Maker, Searcher};

struct BenchResult {
    name: String,
    mode: String,
    total_time_ms: f64,
    avg_time_ms: f64,
    count: usize,
}

fn build_fixture(dir: &std::path::Path, ranges: usize) -> std::path::PathBuf {
    let src = dir.join("src.txt");
    let mut file = std::fs::File::create(&src).unwrap();
    let mut ip = 0u32;
    let step = (u32::MAX / ranges as u32).max(256);
    for i in 0..ranges {
        let end = ip.saturating_add(step - 1).min(u32::MAX - 1);
        writeln!(
            file,
            "{}.{}.{}.{}|{}.{}.{}.{}|REGION-{i}",
            (ip >> 24) & 0xFF, (ip >> 16) & 0xFF, (ip >> 8) & 0xFF, ip & 0xFF,
            (end >> 24) & 0xFF, (end >> 16) & 0xFF, (end >> 8) & 0xFF, end & 0xFF,
        )
        .unwrap();
        ip = end + 1;
    }
    writeln!(file, "{}.{}.{}.{}|255.255.255.255|TAIL", (ip >> 24) & 0xFF, (ip >> 16) & 0xFF, (ip >> 8) & 0xFF, ip & 0xFF).unwrap();

    let dst = dir.join("bench.xdb");
    let mut maker = Maker::new(&src, &dst);
    maker.init().unwrap();
    maker.start().unwrap();
    maker.finish().unwrap();
    dst
}

fn run_benchmark_mode(name: &str, mode: LoaderMode, db_path: &std::path::Path, queries: &[u32]) -> BenchResult {
    let searcher = match mode {
        LoaderMode::File => Searcher::open_file(db_path).unwrap(),
        LoaderMode::Vector => Searcher::open_vector(db_path).unwrap(),
        LoaderMode::Memory => Searcher::open_memory(db_path).unwrap(),
    };

    let start = Instant::now();
    for &ip in queries {
        let _ = searcher.search(ip).unwrap();
    }
    let duration = start.elapsed();

    let total_time_ms = duration.as_secs_f64() * 1000.0;
    BenchResult {
        name: name.to_string(),
        mode: format!("{mode:?}"),
        total_time_ms,
        avg_time_ms: total_time_ms / queries.len() as f64,
        count: queries.len(),
    }
}

fn print_table(results: &[BenchResult]) {
    println!("\n=== Benchmark Summary ===");
    println!("┌─────┬──────────────┬──────────┬────────────────┬────────────────┬─────────┐");
    println!("│ No. │ Name         │ Mode     │ Total Time (ms)│ Avg Time (ms)  │ Count   │");
    println!("├─────┼──────────────┼──────────┼────────────────┼────────────────┼─────────┤");
    for (i, res) in results.iter().enumerate() {
        println!(
            "│{:^5}│{:^14}│{:^10}│{:^16.2}│{:^16.5}│{:^9}│",
            i + 1, res.name, res.mode, res.total_time_ms, res.avg_time_ms, res.count
        );
    }
    println!("└─────┴──────────────┴──────────┴────────────────┴────────────────┴─────────┘");
}

fn sample_queries() -> Vec<u32> {
    (0..4000u32).map(|i| i.wrapping_mul(1_000_003)).collect()
}

#[test]
fn bench_ipv4_memory() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = build_fixture(dir.path(), 64);
    let result = run_benchmark_mode("xdb-rs", LoaderMode::Memory, &db_path, &sample_queries());
    println!("memory: {:.5} ms avg, {} queries", result.avg_time_ms, result.count);
}

#[test]
fn bench_ipv4_vector() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = build_fixture(dir.path(), 64);
    let result = run_benchmark_mode("xdb-rs", LoaderMode::Vector, &db_path, &sample_queries());
    println!("vector: {:.5} ms avg, {} queries", result.avg_time_ms, result.count);
}

#[test]
fn bench_all_modes() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = build_fixture(dir.path(), 64);
    let queries = sample_queries();

    let results = vec![
        run_benchmark_mode("xdb-rs", LoaderMode::File, &db_path, &queries),
        run_benchmark_mode("xdb-rs", LoaderMode::Vector, &db_path, &queries),
        run_benchmark_mode("xdb-rs", LoaderMode::Memory, &db_path, &queries),
    ];
    print_table(&results);
}
