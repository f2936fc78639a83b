use rustyline::{DefaultEditor, error::ReadlineError};

use varpool_core::config::PoolConfig;

use crate::session::{HELP, Session};

fn print_repl_help() {
    eprintln!("Commands: :quit | :exit | :q, :help");
}

pub fn run(config: &PoolConfig) -> anyhow::Result<()> {
    let mut session = Session::new(config);

    // In-memory line editor with history and arrow key support
    let mut rl = DefaultEditor::new()?;

    print_repl_help();

    loop {
        match rl.readline("varpool> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                if trimmed.starts_with(':') {
                    match trimmed {
                        ":quit" | ":exit" | ":q" => return Ok(()),
                        ":help" => {
                            print_repl_help();
                            eprintln!("{}", HELP);
                        }
                        _ => eprintln!("Unknown command. Type :help for help."),
                    }
                    continue;
                }

                match session.execute(trimmed) {
                    Ok(Some(output)) if !output.is_empty() => println!("{}", output),
                    Ok(_) => {}
                    Err(e) => eprintln!("Error: {:#}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C: drop the current line and prompt again
                eprintln!("^C");
            }
            Err(ReadlineError::Eof) => {
                println!();
                return Ok(());
            }
            Err(e) => {
                eprintln!("Readline error: {}", e);
                continue;
            }
        }
    }
}
