use std::io::Write;

use xdb_rs::{Maker, Searcher};

fn build_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let src = dir.join("src.txt");
    std::fs::File::create(&src)
        .unwrap()
        .write_all(
            b"1.0.0.0|1.0.0.255|CN|Fujian|Fuzhou\n\
              1.0.1.0|1.0.3.255|AU|Victoria|Melbourne\n\
              1.0.4.0|8.7.255.255|US\n\
              8.8.8.0|8.8.8.255|US|California|Mountain View\n\
              8.8.9.0|255.255.255.255|ZZ\n",
        )
        .unwrap();
    let dst = dir.join("fixture.xdb");
    let mut maker = Maker::new(&src, &dst);
    maker.init().expect("init");
    maker.start().expect("start");
    maker.finish().expect("finish");
    dst
}

#[test]
fn ipv4_search_finds_the_right_region() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = build_fixture(dir.path());

    let searcher = Searcher::open_memory(&db_path).expect("failed to init searcher");

    let (result, io_count) = searcher.search(u32::from(std::net::Ipv4Addr::new(8, 8, 8, 8))).expect("search failed");
    assert_eq!(result, "US|California|Mountain View");
    assert_eq!(io_count, 0, "memory mode must not touch the file");

    let (result, _) = searcher.search(u32::from(std::net::Ipv4Addr::new(1, 0, 0, 1))).expect("search failed");
    assert_eq!(result, "CN|Fujian|Fuzhou");
}

#[test]
fn every_loader_mode_agrees_on_the_region() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = build_fixture(dir.path());

    let file_searcher = Searcher::open_file(&db_path).unwrap();
    let vector_searcher = Searcher::open_vector(&db_path).unwrap();
    let memory_searcher = Searcher::open_memory(&db_path).unwrap();

    for ip in [
        std::net::Ipv4Addr::new(1, 0, 0, 1),
        std::net::Ipv4Addr::new(1, 0, 2, 200),
        std::net::Ipv4Addr::new(8, 8, 8, 8),
        std::net::Ipv4Addr::new(200, 1, 1, 1),
    ] {
        let ip = u32::from(ip);
        let (a, _) = file_searcher.search(ip).unwrap();
        let (b, _) = vector_searcher.search(ip).unwrap();
        let (c, io) = memory_searcher.search(ip).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(io, 0);
    }
}
