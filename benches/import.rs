use std::{fs, path::PathBuf};

use array_import::{
    ManifestLayout, Registry, ReferenceGenome,
    allele::{self, GenotypeCall},
    import_manifest, manifest,
};
use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tempfile::tempdir;

fn create_reference(sequence: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ref.fa");
    fs::write(&path, format!(">chr1\n{}\n", sequence)).unwrap();
    (dir, path)
}

fn create_manifest(records: usize) -> String {
    let mut content = String::from("Illumina, Inc.\n[Assay]\nname,chr,pos,geno\n");
    for i in 1..=records {
        content.push_str(&format!("rs{i},1,{i},[A/G]\n"));
    }
    content.push_str("[Controls]\n");
    content
}

fn bench_reference_lookup(c: &mut Criterion) {
    let (_dir, reference_path) = create_reference(&"ACGT".repeat(256));
    let positions: Vec<u64> = (1..=512).collect();

    c.bench_function("reference_lookup_uncached", |b| {
        b.iter_batched(
            || ReferenceGenome::open(&reference_path, None).unwrap(),
            |reference| {
                for &pos in &positions {
                    black_box(reference.base("chr1", pos).unwrap());
                }
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("reference_lookup_cached", |b| {
        let reference = ReferenceGenome::open(&reference_path, None).unwrap();
        for &pos in &positions {
            let _ = reference.base("chr1", pos).unwrap();
        }
        b.iter(|| {
            for &pos in &positions {
                black_box(reference.base("chr1", pos).unwrap());
            }
        });
    });
}

fn bench_resolution(c: &mut Criterion) {
    let calls: Vec<GenotypeCall> = ["[A/G]", "[T/C]", "[G/C]", "[A/C]", "[D/I]", "[A/T]"]
        .iter()
        .map(|raw| GenotypeCall::parse(raw).unwrap())
        .collect();

    c.bench_function("allele_resolution", |b| {
        b.iter(|| {
            for call in &calls {
                for base in ['A', 'C', 'G', 'T'] {
                    black_box(allele::resolve(call, base));
                }
            }
        });
    });
}

fn bench_manifest_parsing(c: &mut Criterion) {
    let data = create_manifest(1000).into_bytes();

    c.bench_function("manifest_parsing", |b| {
        b.iter(|| {
            let reader = manifest::Reader::new(data.as_slice(), &ManifestLayout::default()).unwrap();
            for result in reader {
                black_box(&result);
            }
        });
    });
}

fn bench_import_pipeline(c: &mut Criterion) {
    let (_dir, reference_path) = create_reference(&"ACGT".repeat(1024));
    let reference = ReferenceGenome::open(&reference_path, None).unwrap();

    let mut group = c.benchmark_group("import_pipeline");
    for records in [1000, 4000] {
        let data = create_manifest(records).into_bytes();
        group.bench_function(BenchmarkId::new("in_memory_registry", records), |b| {
            b.iter_batched(
                || {
                    let mut registry = Registry::open_in_memory().unwrap();
                    registry.register_array("GSA").unwrap();
                    registry
                },
                |mut registry| {
                    import_manifest(
                        data.as_slice(),
                        &ManifestLayout::default(),
                        "GSA",
                        &reference,
                        &mut registry,
                    )
                    .expect("import");
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    import_benches,
    bench_reference_lookup,
    bench_resolution,
    bench_manifest_parsing,
    bench_import_pipeline
);
criterion_main!(import_benches);
