//! Parser throughput: one request fed whole, and the same request fed in
//! small chunks that split lines.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use microhttp::{ParseStatus, RequestParser};

const REQUEST: &[u8] = b"POST /api/v1/items HTTP/1.1\r\n\
Host: example.com\r\n\
User-Agent: bench/1.0\r\n\
Accept: application/json\r\n\
Content-Type: application/json\r\n\
x-request-id: 4f1c2a\r\n\
Content-Length: 27\r\n\
\r\n\
{\"name\":\"widget\",\"qty\":12}\n";

fn parse_chunked(chunk_size: usize) -> ParseStatus {
    let mut parser = RequestParser::new();
    for chunk in REQUEST.chunks(chunk_size) {
        parser.add_chunk(chunk);
    }
    parser.status()
}

fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parser");
    group.throughput(Throughput::Bytes(REQUEST.len() as u64));

    group.bench_function("whole", |b| {
        b.iter(|| {
            let mut parser = RequestParser::new();
            black_box(parser.add_chunk(black_box(REQUEST)))
        })
    });

    for size in [7usize, 64] {
        group.bench_function(format!("chunks_{}", size), |b| {
            b.iter(|| black_box(parse_chunked(black_box(size))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parser);
criterion_main!(benches);
