use std::io::{self, BufRead, Write};

use anyhow::Result;
use clap::{App, Arg};
use log::*;

use buddymem::{display, BuddyAllocator};

fn main() -> Result<()> {
    std::env::set_var("RUST_LOG", "info");
    pretty_env_logger::init();

    let matches = App::new("buddymem")
        .about("Buddy system memory management CLI")
        .arg(Arg::with_name("total-size")
            .short("t")
            .long("total-size")
            .value_name("KB")
            .default_value("1024")
            .help("Total managed memory in KB"))
        .arg(Arg::with_name("min-block-size")
            .short("m")
            .long("min-block-size")
            .value_name("KB")
            .default_value("16")
            .help("Smallest block the allocator will split down to, in KB"))
        .get_matches();

    let total_size: u64 = matches.value_of("total-size").unwrap().parse()?;
    let min_block_size: u64 = matches.value_of("min-block-size").unwrap().parse()?;

    // One allocator value lives for the whole session and every
    // command below operates on it.
    let mut allocator = BuddyAllocator::new(total_size, min_block_size)?;

    println!(
        "Managing {} KB with a {} KB minimum block.",
        total_size, min_block_size
    );
    println!("Commands: allocate <kb>, free <offset>, show, stats, quit.");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("allocate") | Some("a") => match parts.next().map(str::parse) {
                Some(Ok(size)) => match allocator.allocate(size) {
                    Ok(allocation) => println!(
                        "Allocated {} KB at offset {}.",
                        allocation.size, allocation.offset
                    ),
                    Err(err) => println!("Error: {}.", err),
                },
                _ => println!("Usage: allocate <kb>"),
            },
            Some("free") | Some("f") => match parts.next().map(str::parse) {
                Some(Ok(offset)) => match allocator.deallocate(offset) {
                    Ok(()) => println!("Freed block at offset {}.", offset),
                    Err(err) => println!("Error: {}.", err),
                },
                _ => println!("Usage: free <offset>"),
            },
            Some("show") | Some("s") => print!("{}", display::render(&allocator)),
            Some("stats") => println!(
                "{} KB used, {} KB available of {} KB total.",
                allocator.used_size(),
                allocator.available_size(),
                allocator.total_size()
            ),
            Some("quit") | Some("q") => break,
            Some(other) => println!("Unknown command '{}'.", other),
            None => {}
        }
    }

    info!("Session closed.");
    Ok(())
}
