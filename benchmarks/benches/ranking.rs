use bookclub::ranking::{RankingParams, Snapshot, rank_candidates};
use bookclub::tally::{tally, weigh_selection};
use bookclub::types::{Book, Election, Nomination, Selection, Vote};
use chrono::{Duration, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::Rng;
use std::hint::black_box;
use uuid::Uuid;

/// Club history with `books` nominations and `elections` decided ballots
fn history(books: usize, elections: usize, voters: usize) -> Snapshot {
    let mut rng = rand::thread_rng();
    let start = Utc::now() - Duration::days(365);
    let mut snapshot = Snapshot::default();

    for i in 0..books {
        let created_at = start + Duration::minutes(i as i64);
        let book = Book {
            id: Uuid::new_v4(),
            title: format!("Book {i}"),
            summary: None,
            created_at,
        };
        snapshot.nominations.push(Nomination {
            id: Uuid::new_v4(),
            book_id: book.id,
            nominator: format!("member-{}", i % 12),
            reactions: rng.gen_range(0..20),
            created_at,
        });
        snapshot.books.push(book);
    }

    for e in 0..elections {
        let opened_at = start + Duration::days(7 * e as i64 + 1);
        let ballot: Vec<_> = (0..5)
            .map(|_| snapshot.books[rng.gen_range(0..books)].id)
            .collect();
        let election = Election {
            id: Uuid::new_v4(),
            opener: "organizer".to_string(),
            ballot: ballot.clone(),
            opened_at,
            closes_at: opened_at + Duration::hours(72),
            closed_at: Some(opened_at + Duration::hours(72)),
            closed_by: None,
            winner: Some(ballot[0]),
        };
        for v in 0..voters {
            snapshot.votes.push(Vote {
                election_id: election.id,
                voter_id: format!("voter-{v}"),
                book_id: ballot[rng.gen_range(0..ballot.len())],
                weight: if v % 3 == 0 { 100.0 } else { 30.0 },
                rank: Some(1),
                cast_at: opened_at,
            });
        }
        snapshot.elections.push(election);
    }

    snapshot
}

fn bench_rank_candidates(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank_candidates");
    let params = RankingParams {
        max_appearances: 3,
        is_staging: false,
        default_ballot_size: 5,
    };

    for books in [50, 500, 5_000] {
        let snapshot = history(books, 20, 25);
        group.bench_with_input(BenchmarkId::from_parameter(books), &snapshot, |b, snapshot| {
            b.iter(|| rank_candidates(black_box(snapshot), black_box(&params)))
        });
    }

    group.finish();
}

fn bench_tally(c: &mut Criterion) {
    let mut group = c.benchmark_group("tally");

    for voters in [10, 1_000, 10_000] {
        let snapshot = history(20, 1, voters);
        let election = snapshot.elections[0].clone();
        group.bench_with_input(
            BenchmarkId::from_parameter(voters),
            &snapshot.votes,
            |b, votes| b.iter(|| tally(black_box(&election), black_box(votes)).unwrap()),
        );
    }

    group.finish();
}

fn bench_weigh_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("weigh_selection");
    let books: Vec<_> = (0..5).map(|_| Uuid::new_v4()).collect();

    let single = Selection::Single(books[0]);
    group.bench_function("single", |b| {
        b.iter(|| weigh_selection(black_box(&single), 100.0).unwrap())
    });

    let ranked = Selection::Ranked(books.clone());
    group.bench_function("ranked", |b| {
        b.iter(|| weigh_selection(black_box(&ranked), 100.0).unwrap())
    });

    let points = Selection::Points(books.iter().map(|id| (*id, 4.0)).collect());
    group.bench_function("points", |b| {
        b.iter(|| weigh_selection(black_box(&points), 100.0).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_rank_candidates, bench_tally, bench_weigh_selection);
criterion_main!(benches);
