use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use stackwasm_vm::{
    ByteStream, ExecutionOptions, FuncType, HostFunc, ImportResolver, Module, Trap, ValType, Value,
};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "stackwasm", about = "Run WebAssembly modules on the stackwasm interpreter")]
struct Cli {
    /// Path to a .wasm binary or a .wat text module.
    file: PathBuf,
    /// Export to call. Lists the exported functions when omitted.
    #[arg(long)]
    invoke: Option<String>,
    /// Arguments for the invoked export, parsed against its parameter types.
    #[arg(allow_negative_numbers = true)]
    args: Vec<String>,
    /// Raise the default log level to debug.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let bytes = read_module(&cli.file)?;
    let options = ExecutionOptions::from_env();
    debug!(?options, file = %cli.file.display(), "loading module");
    let mut module = Module::with_options(&bytes, options, &PrintImports)
        .with_context(|| format!("failed to load {}", cli.file.display()))?;

    let Some(name) = cli.invoke else {
        for (name, ty) in module.exports() {
            println!("{name}: {ty}");
        }
        return Ok(());
    };

    let ty = module
        .exports()
        .find(|(export, _)| *export == name)
        .map(|(_, ty)| ty.clone())
        .ok_or_else(|| anyhow!("no exported function named `{name}`"))?;
    let args = parse_args(&ty, &cli.args)?;
    let results = module
        .call(&name, &args)
        .with_context(|| format!("`{name}` trapped"))?;
    for value in results {
        println!("{value}");
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
}

fn read_module(path: &Path) -> anyhow::Result<Vec<u8>> {
    let stream =
        ByteStream::from_path(path).with_context(|| format!("reading {}", path.display()))?;
    if path.extension().is_some_and(|ext| ext == "wat") {
        return wat::parse_bytes(stream.as_bytes())
            .map(|parsed| parsed.into_owned())
            .with_context(|| format!("parsing {}", path.display()));
    }
    Ok(stream.into_bytes())
}

fn parse_args(ty: &FuncType, raw: &[String]) -> anyhow::Result<Vec<Value>> {
    if raw.len() != ty.params.len() {
        bail!("expected {} argument(s) for {ty}, got {}", ty.params.len(), raw.len());
    }
    ty.params
        .iter()
        .zip(raw)
        .map(|(param, text)| parse_value(*param, text))
        .collect()
}

fn parse_value(ty: ValType, text: &str) -> anyhow::Result<Value> {
    let text = text.trim();
    let value = match ty {
        ValType::I32 => Value::I32(parse_int(text, ValType::I32)?),
        ValType::I64 => Value::I64(parse_int(text, ValType::I64)?),
        ValType::F32 => Value::from_f32(
            text.parse()
                .with_context(|| format!("`{text}` is not an f32"))?,
        ),
        ValType::F64 => Value::from_f64(
            text.parse()
                .with_context(|| format!("`{text}` is not an f64"))?,
        ),
    };
    Ok(value)
}

/// Decimal or `0x` hexadecimal. Hex accepts the full unsigned bit pattern.
fn parse_int<T>(text: &str, ty: ValType) -> anyhow::Result<T>
where
    T: TryFrom<i128>,
{
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16),
        None => digits.parse::<i128>(),
    }
    .with_context(|| format!("`{text}` is not an {ty}"))?;
    let wide = if negative { -magnitude } else { magnitude };
    let bits = if ty == ValType::I32 { 32 } else { 64 };
    // unsigned spellings wrap into the signed range
    let wrapped = if wide >= 1i128 << (bits - 1) && wide < 1i128 << bits {
        wide - (1i128 << bits)
    } else {
        wide
    };
    T::try_from(wrapped).map_err(|_| anyhow!("`{text}` is out of range for {ty}"))
}

/// Binds every result-less `print*` import to a stdout printer.
struct PrintImports;

impl ImportResolver for PrintImports {
    fn resolve_func(&self, module: &str, name: &str, ty: &FuncType) -> Option<Arc<HostFunc>> {
        if !name.starts_with("print") || !ty.results.is_empty() {
            return None;
        }
        debug!(module, name, "binding print import");
        let printer: Arc<HostFunc> = Arc::new(|args: &[Value]| {
            let line: Vec<String> = args.iter().map(Value::to_string).collect();
            println!("{}", line.join(" "));
            Ok::<_, Trap>(Vec::new())
        });
        Some(printer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_follow_parameter_types() {
        let ty = FuncType::new([ValType::I32, ValType::I64, ValType::F32, ValType::F64], []);
        let raw: Vec<String> = ["-7", "0x10", "1.5", "-2.25"].map(String::from).into();
        assert_eq!(
            parse_args(&ty, &raw).unwrap(),
            vec![
                Value::I32(-7),
                Value::I64(16),
                Value::from_f32(1.5),
                Value::from_f64(-2.25)
            ]
        );
    }

    #[test]
    fn unsigned_spellings_wrap() {
        assert_eq!(parse_value(ValType::I32, "0xFFFFFFFF").unwrap(), Value::I32(-1));
        assert_eq!(parse_value(ValType::I32, "4294967295").unwrap(), Value::I32(-1));
        assert!(parse_value(ValType::I32, "4294967296").is_err());
        assert!(parse_value(ValType::I64, "abc").is_err());
    }

    #[test]
    fn argument_count_is_checked() {
        let ty = FuncType::new([ValType::I32], []);
        assert!(parse_args(&ty, &[]).is_err());
    }

    #[test]
    fn only_result_less_print_imports_bind() {
        let unit = FuncType::new([ValType::I32], []);
        let valued = FuncType::new([], [ValType::I32]);
        assert!(PrintImports.resolve_func("env", "print_i32", &unit).is_some());
        assert!(PrintImports.resolve_func("env", "print", &valued).is_none());
        assert!(PrintImports.resolve_func("env", "log", &unit).is_none());
    }

    #[test]
    fn modules_load_from_binary_and_text_files() {
        let dir = std::env::temp_dir().join(format!("stackwasm-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let text = r#"(module (func (export "one") (result i32) (i32.const 1)))"#;
        let wat_path = dir.join("one.wat");
        std::fs::write(&wat_path, text).unwrap();
        let binary = read_module(&wat_path).unwrap();
        assert_eq!(&binary[..4], b"\0asm");

        let wasm_path = dir.join("one.wasm");
        std::fs::write(&wasm_path, &binary).unwrap();
        assert_eq!(read_module(&wasm_path).unwrap(), binary);
        assert!(read_module(&dir.join("missing.wasm")).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn cli_accepts_negative_arguments() {
        let cli = Cli::try_parse_from(["stackwasm", "m.wat", "--invoke", "f", "-3", "4"]).unwrap();
        assert_eq!(cli.invoke.as_deref(), Some("f"));
        assert_eq!(cli.args, vec!["-3", "4"]);
    }
}
