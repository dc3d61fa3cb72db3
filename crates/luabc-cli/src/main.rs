use std::env;
use std::fs;
use std::io::Write;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    let mut input: Option<String> = None;
    let mut output: Option<String> = None;
    let mut dump = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-o" => {
                i += 1;
                match args.get(i) {
                    Some(path) => output = Some(path.clone()),
                    None => {
                        eprintln!("luabc: -o requires a path argument");
                        return ExitCode::FAILURE;
                    }
                }
            }
            "--dump" => dump = true,
            path => input = Some(path.to_string()),
        }
        i += 1;
    }

    let Some(filename) = input else {
        println!("Usage: luabc <source.lua> [-o <output>] [--dump]");
        return ExitCode::SUCCESS;
    };

    let source = match fs::read_to_string(&filename) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("luabc: error reading '{}': {}", filename, e);
            return ExitCode::FAILURE;
        }
    };

    if dump {
        let bytes = match luabc::compile(&source, &filename) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("{}", err);
                return ExitCode::FAILURE;
            }
        };
        print!("{}", luabc::disassemble(&bytes));
        return ExitCode::SUCCESS;
    }

    let out_path = output.unwrap_or_else(|| format!("{}c", filename));
    let mut out_file = match fs::File::create(&out_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("luabc: error creating '{}': {}", out_path, e);
            return ExitCode::FAILURE;
        }
    };

    match luabc::compile_to_writer(&source, &filename, &mut out_file) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
