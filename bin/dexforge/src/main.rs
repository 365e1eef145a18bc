use clap::{Arg, Command};
use dexforge::dex::class_path::{ClassPath, ClassPathArena, LARGEST_GAP_FIRST_VERSION};
use dexforge::dex::{DexContainer, Error};
use std::fs;
use std::process;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("dexforge")
        .version("0.1.0")
        .about("Inspect and rewrite bytecode containers")
        .arg(
            Arg::new("dump")
                .long("dump")
                .help("Print every class with its members and method bodies"),
        )
        .arg(
            Arg::new("fields")
                .long("fields")
                .help("Print linked instance field offsets for every class"),
        )
        .arg(
            Arg::new("layout-version")
                .long("layout-version")
                .value_name("N")
                .takes_value(true)
                .help("Field layout version used with --fields (default 67)"),
        )
        .arg(
            Arg::new("rewrite")
                .long("rewrite")
                .value_name("OUT")
                .takes_value(true)
                .help("Re-intern, re-place and re-serialize the container into OUT"),
        )
        .arg(
            Arg::new("INPUT")
                .help("The container file to read")
                .required(true)
                .index(1),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    log::info!("Reading '{}'", input);
    let bytes = fs::read(input)?;
    let container = match DexContainer::read(&bytes) {
        Ok(container) => container,
        Err(error) => {
            log::error!("Failed to read '{}': {:?}", input, error);
            process::exit(1);
        }
    };

    let pools = container.pools();
    println!(
        "{}: {} classes, {} methods, {} fields, {} protos, {} types, {} strings",
        input,
        container.classes().len(),
        pools.method_count(),
        pools.field_count(),
        pools.proto_count(),
        pools.type_count(),
        pools.string_count()
    );

    if matches.is_present("dump") {
        dump(&container);
    }

    if matches.is_present("fields") {
        let version = match matches.value_of("layout-version") {
            None => LARGEST_GAP_FIRST_VERSION,
            Some(raw) => match raw.parse() {
                Ok(version) => version,
                Err(_) => {
                    log::error!("Invalid layout version '{}'", raw);
                    process::exit(1);
                }
            },
        };
        print_field_offsets(&container, version)?;
    }

    if let Some(output) = matches.value_of("rewrite") {
        log::info!("Rewriting into '{}'", output);
        container.save_to_path(output, false)?;
    }

    Ok(())
}

fn dump(container: &DexContainer) {
    let pools = container.pools();
    for class in container.classes() {
        println!();
        print!("class {}", pools.type_descriptor(class.class));
        if let Some(superclass) = class.superclass {
            print!(" extends {}", pools.type_descriptor(superclass));
        }
        if let Some(interfaces) = class.interfaces {
            let names: Vec<&str> = pools
                .type_list(interfaces)
                .iter()
                .map(|interface| pools.type_descriptor(*interface))
                .collect();
            print!(" implements {}", names.join(", "));
        }
        println!(" [{:?}]", class.access_flags);
        if let Some(file) = class.source_file {
            println!("  source file: {}", pools.string(file));
        }

        for field in class.static_fields.iter().chain(&class.instance_fields) {
            let data = pools.field(field.field);
            println!(
                "  field {} {}",
                pools.type_descriptor(data.ty),
                pools.string(data.name)
            );
        }

        for method in class.direct_methods.iter().chain(&class.virtual_methods) {
            let data = pools.method(method.method);
            let proto = pools.proto(data.proto);
            println!(
                "  method {} ({})",
                pools.string(data.name),
                pools.string(proto.shorty)
            );
            let body = match &method.code {
                Some(body) => body,
                None => continue,
            };
            println!(
                "    {} registers, {} code units, {} try blocks",
                body.registers_size,
                body.code_units,
                body.tries.len()
            );
            for instruction in &body.instructions {
                match instruction.opcode() {
                    Some(opcode) => println!("    {}", opcode.mnemonic()),
                    None => println!("    .payload ({} code units)", instruction.code_units()),
                }
            }
        }
    }
}

fn print_field_offsets(container: &DexContainer, version: u32) -> Result<(), Error> {
    let arena = ClassPathArena::new();
    let path = ClassPath::new(&arena, version);
    path.add_container(container);

    for class in container.classes() {
        let descriptor = container.pools().type_descriptor(class.class);
        println!("{} (layout version {})", descriptor, version);
        for field in path.instance_fields(descriptor)? {
            println!("  #{}: {} {}", field.offset, field.descriptor, field.name);
        }
    }
    Ok(())
}
