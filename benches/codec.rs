use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mpack::{decode, encode, Value};

/// A document shaped like typical API traffic: string-keyed maps, short
/// strings, small integers, a few nested arrays.
fn sample_document() -> Value {
    let record = |i: u32| {
        Value::Map(vec![
            (Value::from("id"), Value::from(i)),
            (Value::from("name"), Value::from(format!("user-{:04}", i))),
            (Value::from("active"), Value::from(i % 3 != 0)),
            (Value::from("score"), Value::Float(i as f64 / 7.0)),
            (
                Value::from("tags"),
                Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")]),
            ),
        ])
    };
    Value::Map(vec![
        (Value::from("version"), Value::from(2u8)),
        (
            Value::from("records"),
            Value::Array((0..100).map(record).collect()),
        ),
        (Value::from("payload"), Value::Binary(vec![0x5A; 512])),
    ])
}

fn bench_encode(c: &mut Criterion) {
    let doc = sample_document();
    c.bench_function("encode_document", |b| {
        b.iter(|| encode(black_box(&doc)).unwrap())
    });
}

fn bench_decode(c: &mut Criterion) {
    let bytes = encode(&sample_document()).unwrap();
    c.bench_function("decode_document", |b| {
        b.iter(|| decode(black_box(&bytes)).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
