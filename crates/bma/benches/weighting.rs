use criterion::{criterion_group, criterion_main, Criterion};
use geobma_bma::{average, enumerate, Candidate, Criterion as BmaCriterion, ScoreTriple};
use ndarray::{Array1, Array2};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

fn criterion_weighting(c: &mut Criterion) {
    let n_obs = 506;
    let mut group = c.benchmark_group("weighting");
    group.sample_size(20);
    for k in [8, 12] {
        let candidates: Vec<String> = (0..k).map(|i| format!("X{i}")).collect();
        let sets = enumerate(&candidates, 1..=k).unwrap();
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let scores = Array1::random_using(sets.len(), Uniform::new(-300., -200.), &mut rng);
        let predictions =
            Array2::random_using((sets.len(), n_obs), Uniform::new(10., 50.), &mut rng);
        let triples: Vec<ScoreTriple> = scores
            .iter()
            .zip(sets.iter())
            .map(|(s, set)| ScoreTriple {
                log_likelihood: *s,
                rss: 1.,
                n_params: set.len() + 4,
                bic: -2. * s,
                map: *s,
                spbic: -2. * s + (set.len() as f64).ln(),
            })
            .collect();
        let rows: Vec<Array1<f64>> = predictions
            .rows()
            .into_iter()
            .map(|r| r.to_owned())
            .collect();
        let pool: Vec<Candidate> = sets
            .iter()
            .zip(triples.iter())
            .zip(rows.iter())
            .map(|((set, scores), predictions)| Candidate {
                set,
                scores,
                predictions,
            })
            .collect();

        group.bench_function(format!("average {} models", sets.len()), |b| {
            b.iter(|| {
                for criterion in BmaCriterion::ALL {
                    std::hint::black_box(average(criterion, &pool, n_obs));
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_weighting);
criterion_main!(benches);
