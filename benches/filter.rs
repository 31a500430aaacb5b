use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ogechina_rs::render::render_chapter;
use ogechina_rs::search::{Filter, matching_verses};
use ogechina_rs::{Chapter, Verse};

/// Al-Baqara sized chapter with repeated, searchable text.
fn long_chapter() -> Chapter {
    const LINES: &[&str] = &[
        "This is the Book about which there is no doubt, a guidance for those conscious of Allah",
        "Who believe in the unseen, establish prayer, and spend out of what We have provided for them",
        "And when it is said to them, Do not cause corruption on the earth, they say, We are but reformers",
        "Indeed, Allah is over all things competent",
    ];
    Chapter {
        number: 2,
        name: "سُورَةُ البَقَرَةِ".to_string(),
        english_name: "Al-Baqara".to_string(),
        verses: (1..=286u32)
            .map(|position| Verse {
                position,
                text: format!("بِسْمِ ٱللَّهِ {position}"),
                translation: Some(LINES[position as usize % LINES.len()].to_string()),
            })
            .collect(),
    }
}

fn bench_matching(c: &mut Criterion) {
    let chapter = long_chapter();
    const QUERIES: &[&str] = &["allah", "reformers", "no such phrase", "ٱللَّهِ"];
    for &query in QUERIES {
        let filter = Filter::parse(query);
        c.bench_with_input(BenchmarkId::new("matching_verses", query), &filter, |b, filter| {
            b.iter(|| black_box(matching_verses(&chapter.verses, filter).len()));
        });
    }
}

fn bench_render(c: &mut Criterion) {
    let chapter = long_chapter();
    let unfiltered = Filter::none();
    c.bench_function("render_chapter::all_rows", |b| {
        b.iter(|| black_box(render_chapter(&chapter, &unfiltered, Some(140)).rows.len()));
    });
    let filter = Filter::parse("competent");
    c.bench_function("render_chapter::filtered", |b| {
        b.iter(|| black_box(render_chapter(&chapter, &filter, None).rows.len()));
    });
}

criterion_group!(benches, bench_matching, bench_render);
criterion_main!(benches);
