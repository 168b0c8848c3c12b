//! Benchmarks for duplicate grouping and ranking.

use std::time::Duration;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};

use concierge_action::duplicates::{analyze, group_by_name, CONTACT_IMPORTANT_FIELDS};
use concierge_core::{CanonicalId, Contact, UserId};

fn contact(index: usize) -> Contact {
    let now = Utc::now();
    let filled = |n: usize| (index % n == 0).then(|| format!("value-{}", index));
    Contact {
        id: CanonicalId::new_v4(),
        user_id: UserId::from("bench"),
        first_name: format!("Person{}", index % 400),
        last_name: Some("Example".to_string()),
        email: filled(2),
        phone: filled(3),
        mobile_phone: filled(5),
        work_phone: None,
        company: filled(4),
        job_title: filled(6),
        address: None,
        birthday: None,
        notes: filled(7),
        website: None,
        created_at: now,
        updated_at: now,
    }
}

fn bench_duplicates(c: &mut Criterion) {
    // 5000 contacts over 400 names: the scan limit of a full-book analysis.
    let book: Vec<Contact> = (0..5000).map(contact).collect();
    let group: Vec<Contact> = (0..12).map(|i| contact(i * 400)).collect();

    let mut bench_group = c.benchmark_group("duplicates");
    bench_group.sample_size(50);
    bench_group.measurement_time(Duration::from_secs(10));

    bench_group.bench_function("analyze_group_of_12", |b| {
        b.iter(|| analyze(group.clone(), CONTACT_IMPORTANT_FIELDS));
    });

    bench_group.bench_function("group_and_analyze_5000", |b| {
        b.iter(|| {
            group_by_name(book.clone())
                .into_iter()
                .map(|g| analyze(g, CONTACT_IMPORTANT_FIELDS))
                .filter(|a| !a.is_empty())
                .count()
        });
    });

    bench_group.finish();
}

criterion_group!(benches, bench_duplicates);
criterion_main!(benches);
