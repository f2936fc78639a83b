use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use varpool_core::rt::ActivityId;
use varpool_core::val::Val;
use varpool_core::var::{SharedDictionary, VariableDictionary};

fn bench_resolve(c: &mut Criterion) {
    let mut dict = VariableDictionary::with_sizes(None, 17, 11);
    let names: Vec<String> = (0..64).map(|i| format!("var{}", i)).collect();
    for name in &names {
        dict.assign(name, Val::Int(1)).unwrap();
    }
    c.bench_function("dict_resolve_existing_64", |b| {
        b.iter(|| {
            for name in &names {
                black_box(dict.resolve(name).unwrap());
            }
        })
    });
}

fn bench_compound(c: &mut Criterion) {
    let mut dict = VariableDictionary::with_sizes(None, 17, 11);
    let tails: Vec<String> = (0..100).map(|i| i.to_string()).collect();
    c.bench_function("dict_compound_assign_100", |b| {
        b.iter(|| {
            for (i, tail) in tails.iter().enumerate() {
                dict.assign_compound("ROW", &[tail.as_str(), "name"], Val::Int(i as i64))
                    .unwrap();
            }
            black_box(dict.compound_value("ROW", &["50", "name"]))
        })
    });
}

// Uncontended reserve/release as an activity entering a method would
fn bench_reserve_release(c: &mut Criterion) {
    let shared = SharedDictionary::new(VariableDictionary::with_sizes(None, 7, 11), None);
    let activity = ActivityId::next();
    c.bench_function("scope_reserve_release", |b| {
        b.iter(|| {
            let access = shared.access(activity).unwrap();
            black_box(access.with(|dict| dict.len()))
        })
    });
}

criterion_group!(benches, bench_resolve, bench_compound, bench_reserve_release);
criterion_main!(benches);
