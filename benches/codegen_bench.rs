use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use ptcg::diag::Result;
use ptcg::generator::{CodeGenerator, GeneratorOptions, ModelRuntime, StaticRuntime};
use ptcg::macros::{self, MacroHandler};
use ptcg::model::Model;

// Latency scenarios over the shipped demo models.

const SCALED_RAMP: &str = include_str!("../demos/scaled_ramp.json");
const SUMMED_SOURCES: &str = include_str!("../demos/summed_sources.json");
const EMBEDDED_CODE: &str = include_str!("../demos/embedded_code.json");

fn scenarios() -> [(&'static str, &'static str); 3] {
    [
        ("scaled_ramp", SCALED_RAMP),
        ("summed_sources", SUMMED_SOURCES),
        ("embedded_code", EMBEDDED_CODE),
    ]
}

/// Ramp feeding a chain of `n_stages` Scale actors into one Display.
fn generate_scaling_model(n_stages: usize) -> String {
    let mut components = vec![r#"{"name": "Ramp", "class": "ptolemy.actor.lib.Ramp",
        "parameters": {"init": 0, "step": 1},
        "ports": [{"name": "output", "direction": "output", "type": "double"}]}"#
        .to_string()];
    let mut links = Vec::new();
    let mut previous = "Ramp".to_string();

    for s in 0..n_stages {
        let name = format!("Scale_{}", s);
        components.push(format!(
            r#"{{"name": "{}", "class": "ptolemy.actor.lib.Scale",
            "parameters": {{"factor": 2}},
            "ports": [{{"name": "input", "direction": "input", "type": "double"}},
                      {{"name": "output", "direction": "output", "type": "double"}}]}}"#,
            name
        ));
        links.push(format!(
            r#"{{"from": "{}.output", "to": "{}.input"}}"#,
            previous, name
        ));
        previous = name;
    }

    components.push(
        r#"{"name": "Show", "class": "ptolemy.actor.lib.gui.Display",
        "ports": [{"name": "input", "direction": "input", "multiport": true}]}"#
            .to_string(),
    );
    links.push(format!(r#"{{"from": "{}.output", "to": "Show.input"}}"#, previous));

    format!(
        r#"{{"name": "Scaling", "director": {{"parameters": {{"iterations": 10}}}},
        "components": [{}], "links": [{}]}}"#,
        components.join(",\n"),
        links.join(",\n")
    )
}

fn typed_model(json: &str) -> Model {
    let mut model = Model::from_json_str(json).expect("model parse failed");
    StaticRuntime
        .preinitialize_and_resolve_types(&mut model)
        .expect("type resolution failed");
    model
}

fn generator() -> CodeGenerator {
    CodeGenerator::new(GeneratorOptions::default()).expect("generator setup failed")
}

// ── Macro processing ────────────────────────────────────────────────────────

struct Echo;

impl MacroHandler for Echo {
    fn replace_macro(&self, name: &str, parameter: &str) -> Result<Option<String>> {
        Ok(Some(format!("{}_{}", name, parameter.len())))
    }
}

fn bench_macro_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/macro_processing");
    for n in [10usize, 100, 1000] {
        let code = "$ref(output) = $val(factor) * $get(input, 0);\n".repeat(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &code, |b, code| {
            b.iter(|| macros::process_code(black_box(code), &Echo).expect("expand failed"));
        });
    }
    group.finish();
}

// ── Full generation ─────────────────────────────────────────────────────────

fn bench_full_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/full_generation");
    let generator = generator();
    for (name, json) in scenarios() {
        let model = typed_model(json);
        group.bench_with_input(BenchmarkId::from_parameter(name), &model, |b, model| {
            b.iter(|| generator.generate_code(black_box(model)).expect("generate failed"));
        });
    }
    group.finish();
}

fn bench_phase_latency(c: &mut Criterion) {
    let generator = generator();
    let model = typed_model(SUMMED_SOURCES);

    {
        let mut group = c.benchmark_group("kpi/phase_latency/load");
        group.bench_function("summed_sources", |b| {
            b.iter(|| typed_model(black_box(SUMMED_SOURCES)));
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("kpi/phase_latency/resolve_adapters");
        group.bench_function("summed_sources", |b| {
            b.iter(|| {
                generator.begin_pass();
                generator.resolve_adapters(black_box(&model)).expect("resolve failed")
            });
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("kpi/phase_latency/assemble");
        group.bench_function("summed_sources", |b| {
            b.iter_batched(
                || {
                    let state = generator.begin_pass();
                    generator.resolve_adapters(&model).expect("resolve failed");
                    generator
                        .analyze_type_conversions(&model, &state)
                        .expect("analyze failed");
                    state
                },
                |state| generator.assemble(black_box(&model), &state).expect("assemble failed"),
                BatchSize::SmallInput,
            );
        });
        group.finish();
    }
}

fn bench_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/generation_scaling");
    let generator = generator();
    for n in [1usize, 10, 50, 200] {
        let model = typed_model(&generate_scaling_model(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &model, |b, model| {
            b.iter(|| generator.generate_code(black_box(model)).expect("generate failed"));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_macro_processing,
    bench_full_generation,
    bench_phase_latency,
    bench_scaling
);
criterion_main!(benches);
