// build.rs
extern crate cc;

fn main() {
    let context = "src/context.c";
    cc::Build::new()
        .file(context)
        .opt_level(3)
        .static_flag(true)
        .warnings(false)
        .compile("context");

    println!("cargo:rerun-if-changed={}", context);
}
