use criterion::{black_box, criterion_group, criterion_main, Criterion};
use luna_compiler::compiler::compile;
use luna_compiler::dump::{dump_to_vec, DumpOptions};

const QUICKSORT: &[u8] = br#"
local function partition(t, lo, hi)
    local pivot = t[hi]
    local i = lo - 1
    for j = lo, hi - 1 do
        if t[j] <= pivot then
            i = i + 1
            t[i], t[j] = t[j], t[i]
        end
    end
    t[i + 1], t[hi] = t[hi], t[i + 1]
    return i + 1
end

local function quicksort(t, lo, hi)
    if lo < hi then
        local p = partition(t, lo, hi)
        quicksort(t, lo, p - 1)
        quicksort(t, p + 1, hi)
    end
end

local data = {9, 3, 7, 1, 8, 2, 6, 4, 5}
quicksort(data, 1, #data)
return data
"#;

fn bench_compile_simple(c: &mut Criterion) {
    let src = b"local x = 42\nreturn x + 1";
    c.bench_function("compile_simple", |b| {
        b.iter(|| compile(black_box(src), "=bench").unwrap());
    });
}

fn bench_compile_quicksort(c: &mut Criterion) {
    c.bench_function("compile_quicksort", |b| {
        b.iter(|| compile(black_box(QUICKSORT), "=bench").unwrap());
    });
}

fn bench_compile_gotos(c: &mut Criterion) {
    let mut src = String::new();
    for i in 0..100 {
        src.push_str(&format!("do goto l{i} end ::l{i}::\n"));
    }
    let bytes = src.into_bytes();
    c.bench_function("compile_100_gotos", |b| {
        b.iter(|| compile(black_box(&bytes), "=bench").unwrap());
    });
}

fn bench_compile_many_locals(c: &mut Criterion) {
    let mut src = String::new();
    for i in 0..200 {
        src.push_str(&format!("local x{i} = {i}\n"));
    }
    src.push_str("return x0\n");
    let bytes = src.into_bytes();
    c.bench_function("compile_200_locals", |b| {
        b.iter(|| compile(black_box(&bytes), "=bench").unwrap());
    });
}

fn bench_dump_quicksort(c: &mut Criterion) {
    let (proto, strings) = compile(QUICKSORT, "=bench").unwrap();
    let opts = DumpOptions::default();
    c.bench_function("dump_quicksort", |b| {
        b.iter(|| dump_to_vec(black_box(&proto), &strings, &opts).unwrap());
    });
}

criterion_group!(
    benches,
    bench_compile_simple,
    bench_compile_quicksort,
    bench_compile_gotos,
    bench_compile_many_locals,
    bench_dump_quicksort
);
criterion_main!(benches);
