use bookclub::ElectionManager;
use bookclub::config::ElectionConfig;
use bookclub::ports::{LogSink, MetadataFetcher, RoleTable};
use bookclub::types::{BookId, BookMetadata, Circle, Selection};
use bookclub::{Result, Store};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

const VOTERS: usize = 200;

struct TitleOnly;

impl MetadataFetcher for TitleOnly {
    async fn fetch(&self, input: &str) -> Result<BookMetadata> {
        Ok(BookMetadata {
            title: input.to_string(),
            summary: None,
        })
    }
}

/// In-memory club with ten nominated books and an open election
fn club(rt: &tokio::runtime::Runtime) -> (ElectionManager, Vec<BookId>) {
    let roles = Arc::new(RoleTable::new());
    for i in 0..VOTERS {
        let circle = if i % 4 == 0 { Circle::Inner } else { Circle::Outer };
        roles.assign(format!("voter-{i}"), circle).unwrap();
    }
    let manager = ElectionManager::new(
        Arc::new(Store::open_in_memory().unwrap()),
        ElectionConfig::for_testing(),
        roles,
        Arc::new(LogSink),
    );

    rt.block_on(async {
        for i in 0..10 {
            let book = manager
                .nominate(&TitleOnly, &"member".to_string(), &format!("Book {i}"))
                .await
                .unwrap();
            manager.set_reactions(&book.id, 10 - i).unwrap();
        }
    });
    let election = manager
        .open_election(&"organizer".to_string(), None)
        .unwrap();
    (manager, election.ballot)
}

/// End-to-end election workflow benchmarks
fn bench_election_workflow(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("election_workflow");
    group.warm_up_time(Duration::from_millis(100));

    let (manager, ballot) = club(&rt);
    let election_id = manager.current_election().unwrap().unwrap().id;

    // Re-votes replace the voter's rows each iteration
    group.bench_function("cast_single_vote", |b| {
        let voter = "voter-0".to_string();
        let selection = Selection::Single(ballot[0]);
        b.iter(|| {
            manager
                .cast_vote(black_box(&election_id), &voter, black_box(&selection))
                .unwrap()
        })
    });

    group.bench_function("cast_ranked_vote", |b| {
        let voter = "voter-1".to_string();
        let selection = Selection::Ranked(ballot.clone());
        b.iter(|| {
            manager
                .cast_vote(black_box(&election_id), &voter, black_box(&selection))
                .unwrap()
        })
    });

    group.bench_function("diagnostics", |b| {
        b.iter(|| black_box(manager.diagnostics().unwrap()))
    });

    group.bench_function("close_with_full_turnout", |b| {
        b.iter_batched(
            || {
                let (manager, ballot) = club(&rt);
                let election_id = manager.current_election().unwrap().unwrap().id;
                for i in 0..VOTERS {
                    let selection = Selection::Single(ballot[i % ballot.len()]);
                    manager
                        .cast_vote(&election_id, &format!("voter-{i}"), &selection)
                        .unwrap();
                }
                (manager, election_id)
            },
            |(manager, election_id)| manager.close_election(&election_id, None).unwrap(),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_election_workflow);
criterion_main!(benches);
