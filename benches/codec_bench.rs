use caformat::codec::{Codec, GzipCodec, XzCodec, ZstdCodec};
use caformat::{
    decode_index, encode_index, reconstruct_with, ChunkContainer, Compression, IndexBuilder,
    IndexKind, MemoryChunkStore, ReconstructOptions, Verifier,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_codecs(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let zstd = ZstdCodec;
    let xz = XzCodec;
    let gzip = GzipCodec;

    c.bench_function("zstd_compress_1mb", |b| b.iter(|| zstd.compress(black_box(&data), 3)));
    c.bench_function("gzip_compress_1mb", |b| b.iter(|| gzip.compress(black_box(&data), 6)));

    let packed = zstd.compress(&data, 3).unwrap();
    c.bench_function("zstd_decompress_1mb", |b| {
        b.iter(|| zstd.decompress(black_box(&packed), data.len()))
    });
    let packed = xz.compress(&data, 6).unwrap();
    c.bench_function("xz_decompress_1mb", |b| b.iter(|| xz.decompress(black_box(&packed), data.len())));
}

fn bench_index(c: &mut Criterion) {
    let verifier = Verifier::default();
    let mut builder = IndexBuilder::new(IndexKind::Blob);
    for i in 0..10_000u32 {
        builder.push(verifier.digest(&i.to_le_bytes()), 64 * 1024);
    }
    let bytes = encode_index(&builder.build().unwrap()).unwrap();

    c.bench_function("decode_index_10k_entries", |b| b.iter(|| decode_index(black_box(&bytes))));
}

fn bench_reconstruct(c: &mut Criterion) {
    let store = MemoryChunkStore::new();
    let verifier = Verifier::default();
    let mut builder = IndexBuilder::new(IndexKind::Blob);
    for i in 0..64u32 {
        let piece: Vec<u8> = (0..64 * 1024u32).map(|j| (i.wrapping_mul(31) ^ j) as u8).collect();
        let hash = verifier.digest(&piece);
        store.put(&hash, &ChunkContainer::compress(&piece, Compression::Zstd, 3).unwrap()).unwrap();
        builder.push(hash, piece.len() as u32);
    }
    let index = builder.build().unwrap();

    for parallelism in [1, 4] {
        let options = ReconstructOptions { parallelism, ..Default::default() };
        c.bench_function(&format!("reconstruct_4mb_p{parallelism}"), |b| {
            b.iter(|| reconstruct_with(black_box(&index), &store, &options).unwrap())
        });
    }
}

criterion_group!(benches, bench_codecs, bench_index, bench_reconstruct);
criterion_main!(benches);
