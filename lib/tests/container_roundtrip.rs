//! End-to-end: assemble a container, serialize it, read it back, and
//! serialize again

use byteorder::{ByteOrder, LittleEndian};
use dexforge::dex::code::{decode_events, CodeBuilder, DebugEvent, Instruction, Opcode};
use dexforge::dex::pools::{
    AnnotationData, AnnotationVisibility, EncodedValue, ItemRef,
};
use dexforge::dex::{
    ClassAccessFlags, ClassDef, DexContainer, EncodedField, EncodedMethod, FieldAccessFlags,
    MethodAccessFlags,
};

/// Two classes: `LHello;` (an instance class with a constructor, a virtual
/// method with a try/catch, fields, an interface and an annotation) and
/// `LHello$Helper;` (a static method with a packed switch)
fn build_container() -> DexContainer {
    let mut container = DexContainer::new();

    let hello = container.pools_mut().intern_type("LHello;").unwrap();
    let object = container.pools_mut().intern_type("Ljava/lang/Object;").unwrap();
    let runnable = container.pools_mut().intern_type("Ljava/lang/Runnable;").unwrap();
    let exception = container.pools_mut().intern_type("Ljava/lang/Exception;").unwrap();
    let helper = container.pools_mut().intern_type("LHello$Helper;").unwrap();
    let marker = container.pools_mut().intern_type("Lcom/example/Marker;").unwrap();
    let int_ty = container.pools_mut().intern_type("I").unwrap();

    let greeting = container.pools_mut().intern_string("hello");
    let source_file = container.pools_mut().intern_string("Hello.java");
    let value_name = container.pools_mut().intern_string("value");
    let flag_name = container.pools_mut().intern_string("flag");
    let label_name = container.pools_mut().intern_string("label");

    let interfaces = container.pools_mut().intern_type_list(&[runnable]);

    let init = container
        .pools_mut()
        .intern_method("LHello;", "<init>", "V", &[])
        .unwrap();
    let object_init = container
        .pools_mut()
        .intern_method("Ljava/lang/Object;", "<init>", "V", &[])
        .unwrap();
    let run = container
        .pools_mut()
        .intern_method("LHello;", "run", "V", &[])
        .unwrap();
    let compute = container
        .pools_mut()
        .intern_method("LHello$Helper;", "compute", "I", &["I"])
        .unwrap();
    let count_field = container
        .pools_mut()
        .intern_field("LHello;", "count", "I")
        .unwrap();
    let total_field = container
        .pools_mut()
        .intern_field("LHello;", "total", "J")
        .unwrap();

    let annotation = container.pools_mut().intern_annotation(AnnotationData {
        visibility: AnnotationVisibility::Runtime,
        ty: marker,
        elements: vec![
            (value_name, EncodedValue::Int(42)),
            (flag_name, EncodedValue::Boolean(true)),
            (label_name, EncodedValue::String(greeting)),
        ],
    });
    let annotations = container.pools_mut().intern_annotation_set(&[annotation]);

    // LHello;.<init>()V
    let mut code = CodeBuilder::new(container.pools_mut(), 1, 1);
    code.add_instruction(Instruction::F35c {
        opcode: Opcode::InvokeDirect,
        registers: vec![0],
        reference: ItemRef::Method(object_init),
    })
    .unwrap();
    code.add_instruction(Instruction::F10x {
        opcode: Opcode::ReturnVoid,
    })
    .unwrap();
    let init_body = code.build().unwrap();

    // LHello;.run()V with a typed catch and a catch-all over the same range
    let mut code = CodeBuilder::new(container.pools_mut(), 4, 1);
    let try_start = code.get_label("try_start");
    let try_end = code.get_label("try_end");
    let catch = code.get_label("catch");
    code.add_catch(exception, try_start, try_end, catch);
    code.add_catch_all(try_start, try_end, catch);
    code.place_label(try_start);
    code.add_line_number(10);
    code.add_instruction(Instruction::F21c {
        opcode: Opcode::ConstString,
        a: 0,
        reference: ItemRef::String(greeting),
    })
    .unwrap();
    code.add_instruction(Instruction::F35c {
        opcode: Opcode::InvokeStatic,
        registers: vec![0],
        reference: ItemRef::Method(compute),
    })
    .unwrap();
    code.add_instruction(Instruction::F11x {
        opcode: Opcode::MoveResult,
        a: 1,
    })
    .unwrap();
    code.place_label(try_end);
    code.add_line_number(11);
    code.add_instruction(Instruction::F10x {
        opcode: Opcode::ReturnVoid,
    })
    .unwrap();
    code.place_label(catch);
    code.add_instruction(Instruction::F11x {
        opcode: Opcode::MoveException,
        a: 2,
    })
    .unwrap();
    code.add_instruction(Instruction::F10x {
        opcode: Opcode::ReturnVoid,
    })
    .unwrap();
    let run_body = code.build().unwrap();

    // LHello$Helper;.compute(I)I with a packed switch
    let mut code = CodeBuilder::new(container.pools_mut(), 3, 1);
    let table = code.get_label("table");
    let case0 = code.get_label("case0");
    code.add_parameter_name(Some(value_name));
    code.add_line_number(20);
    code.add_start_local(2, Some(value_name), Some(int_ty), None);
    code.add_instruction(Instruction::F31t {
        opcode: Opcode::PackedSwitch,
        a: 2,
        target: table,
    })
    .unwrap();
    code.add_line_number(21);
    code.add_instruction(Instruction::F11n {
        opcode: Opcode::Const4,
        a: 0,
        literal: 0,
    })
    .unwrap();
    code.add_instruction(Instruction::F11x {
        opcode: Opcode::Return,
        a: 0,
    })
    .unwrap();
    code.place_label(case0);
    code.add_line_number(22);
    code.add_instruction(Instruction::F11n {
        opcode: Opcode::Const4,
        a: 0,
        literal: 1,
    })
    .unwrap();
    code.add_instruction(Instruction::F11x {
        opcode: Opcode::Return,
        a: 0,
    })
    .unwrap();
    code.place_label(table);
    code.add_instruction(Instruction::PackedSwitchPayload {
        first_key: 0,
        targets: vec![case0],
    })
    .unwrap();
    let compute_body = code.build().unwrap();

    let mut hello_def = ClassDef::new(hello, ClassAccessFlags::PUBLIC);
    hello_def.superclass = Some(object);
    hello_def.interfaces = Some(interfaces);
    hello_def.source_file = Some(source_file);
    hello_def.annotations = Some(annotations);
    hello_def.static_fields.push(EncodedField {
        field: total_field,
        access_flags: FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC,
    });
    hello_def.instance_fields.push(EncodedField {
        field: count_field,
        access_flags: FieldAccessFlags::PRIVATE,
    });
    hello_def.direct_methods.push(EncodedMethod {
        method: init,
        access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::CONSTRUCTOR,
        code: Some(init_body),
    });
    hello_def.virtual_methods.push(EncodedMethod {
        method: run,
        access_flags: MethodAccessFlags::PUBLIC,
        code: Some(run_body),
    });
    container.add_class(hello_def);

    let mut helper_def = ClassDef::new(helper, ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL);
    helper_def.superclass = Some(object);
    helper_def.direct_methods.push(EncodedMethod {
        method: compute,
        access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        code: Some(compute_body),
    });
    container.add_class(helper_def);

    container
}

fn find_class<'a>(container: &'a DexContainer, descriptor: &str) -> &'a ClassDef {
    container
        .classes()
        .iter()
        .find(|class| container.pools().type_descriptor(class.class) == descriptor)
        .expect("class present")
}

#[test]
fn reserialization_is_byte_identical() {
    let container = build_container();
    let bytes = container.serialize().unwrap();
    let read = DexContainer::read(&bytes).unwrap();
    let rewritten = read.serialize().unwrap();
    assert_eq!(bytes, rewritten);
}

#[test]
fn read_back_preserves_class_structure() {
    let container = build_container();
    let bytes = container.serialize().unwrap();
    let read = DexContainer::read(&bytes).unwrap();
    let pools = read.pools();

    assert_eq!(read.classes().len(), 2);
    let hello = find_class(&read, "LHello;");
    assert_eq!(
        pools.type_descriptor(hello.superclass.unwrap()),
        "Ljava/lang/Object;"
    );
    let interfaces = pools.type_list(hello.interfaces.unwrap());
    assert_eq!(interfaces.len(), 1);
    assert_eq!(pools.type_descriptor(interfaces[0]), "Ljava/lang/Runnable;");
    assert_eq!(pools.string(hello.source_file.unwrap()), "Hello.java");
    assert_eq!(hello.static_fields.len(), 1);
    assert_eq!(hello.instance_fields.len(), 1);
    assert_eq!(
        pools.string(pools.field(hello.instance_fields[0].field).name),
        "count"
    );
    assert!(hello.instance_fields[0]
        .access_flags
        .contains(FieldAccessFlags::PRIVATE));

    let annotations = pools.annotation_set(hello.annotations.unwrap());
    assert_eq!(annotations.len(), 1);
    let annotation = pools.annotation(annotations[0]);
    assert_eq!(annotation.visibility, AnnotationVisibility::Runtime);
    assert_eq!(pools.type_descriptor(annotation.ty), "Lcom/example/Marker;");
    assert_eq!(annotation.elements.len(), 3);
    assert!(annotation.elements.iter().any(|(name, value)| {
        pools.string(*name) == "value" && *value == EncodedValue::Int(42)
    }));
    assert!(annotation
        .elements
        .iter()
        .any(|(_, value)| *value == EncodedValue::Boolean(true)));
}

#[test]
fn read_back_preserves_method_bodies() {
    let container = build_container();
    let original_run = find_class(&container, "LHello;").virtual_methods[0]
        .code
        .clone()
        .unwrap();
    let bytes = container.serialize().unwrap();
    let read = DexContainer::read(&bytes).unwrap();
    let pools = read.pools();

    let hello = find_class(&read, "LHello;");
    let run = hello.virtual_methods[0].code.as_ref().unwrap();
    assert_eq!(run.registers_size, 4);
    assert_eq!(run.ins_size, 1);
    // One receiver word for the virtual call, one argument word
    assert_eq!(run.outs_size, original_run.outs_size);
    assert_eq!(run.code_units, original_run.code_units);
    assert_eq!(run.instructions.len(), original_run.instructions.len());

    // The merged try block keeps the typed handler and the catch-all
    assert_eq!(run.tries.len(), 1);
    let block = &run.tries[0];
    assert_eq!(block.start_address, 0);
    assert_eq!(block.code_unit_count, 6);
    assert_eq!(block.handlers.len(), 1);
    assert_eq!(
        pools.type_descriptor(block.handlers[0].0),
        "Ljava/lang/Exception;"
    );
    assert_eq!(block.handlers[0].1, 7);
    assert_eq!(block.catch_all, Some(7));

    // Line events survive the debug stream round trip
    let original_events = decode_events(original_run.debug_info.as_ref().unwrap());
    let events = decode_events(run.debug_info.as_ref().unwrap());
    assert_eq!(events.len(), original_events.len());
    assert!(matches!(
        events[0],
        DebugEvent::Line {
            address: 0,
            line: 10
        }
    ));

    // The switch method keeps its payload and parameter name
    let helper = find_class(&read, "LHello$Helper;");
    let compute = helper.direct_methods[0].code.as_ref().unwrap();
    assert!(compute
        .instructions
        .iter()
        .any(|instruction| matches!(
            instruction,
            Instruction::PackedSwitchPayload { first_key: 0, targets } if targets.len() == 1
        )));
    let debug = compute.debug_info.as_ref().unwrap();
    assert_eq!(debug.parameter_names.len(), 1);
    assert_eq!(pools.string(debug.parameter_names[0].unwrap()), "value");
    assert_eq!(debug.line_start, 20);
}

#[test]
fn overlapping_handlers_round_trip_as_split_blocks() {
    let mut container = DexContainer::new();
    let class = container.pools_mut().intern_type("LSplit;").unwrap();
    let first = container
        .pools_mut()
        .intern_type("Ljava/lang/IllegalStateException;")
        .unwrap();
    let second = container
        .pools_mut()
        .intern_type("Ljava/lang/IllegalArgumentException;")
        .unwrap();
    let poke = container
        .pools_mut()
        .intern_method("LSplit;", "poke", "V", &[])
        .unwrap();

    let mut code = CodeBuilder::new(container.pools_mut(), 2, 1);
    let labels: Vec<_> = (0..4)
        .map(|index| code.get_label(&format!("a{}", index)))
        .collect();
    let handler_one = code.get_label("handler_one");
    let handler_two = code.get_label("handler_two");
    // First declared covers [0, 2), second [1, 3): the middle unit gets
    // both handlers, in declaration order
    code.add_catch(first, labels[0], labels[2], handler_one);
    code.add_catch(second, labels[1], labels[3], handler_two);
    for label in &labels {
        code.place_label(*label);
        code.add_instruction(Instruction::F10x {
            opcode: Opcode::Nop,
        })
        .unwrap();
    }
    code.add_instruction(Instruction::F10x {
        opcode: Opcode::ReturnVoid,
    })
    .unwrap();
    code.place_label(handler_one);
    code.add_instruction(Instruction::F11x {
        opcode: Opcode::MoveException,
        a: 0,
    })
    .unwrap();
    code.add_instruction(Instruction::F10x {
        opcode: Opcode::ReturnVoid,
    })
    .unwrap();
    code.place_label(handler_two);
    code.add_instruction(Instruction::F11x {
        opcode: Opcode::MoveException,
        a: 0,
    })
    .unwrap();
    code.add_instruction(Instruction::F10x {
        opcode: Opcode::ReturnVoid,
    })
    .unwrap();
    let body = code.build().unwrap();
    assert_eq!(body.tries.len(), 3);

    let mut class_def = ClassDef::new(class, ClassAccessFlags::PUBLIC);
    class_def.virtual_methods.push(EncodedMethod {
        method: poke,
        access_flags: MethodAccessFlags::PUBLIC,
        code: Some(body),
    });
    container.add_class(class_def);

    let bytes = container.serialize().unwrap();
    let read = DexContainer::read(&bytes).unwrap();
    let pools = read.pools();
    let tries = &read.classes()[0].virtual_methods[0].code.as_ref().unwrap().tries;

    assert_eq!(tries.len(), 3);
    assert_eq!((tries[0].start_address, tries[0].code_unit_count), (0, 1));
    assert_eq!(tries[0].handlers.len(), 1);
    assert_eq!((tries[1].start_address, tries[1].code_unit_count), (1, 1));
    let middle: Vec<&str> = tries[1]
        .handlers
        .iter()
        .map(|(ty, _)| pools.type_descriptor(*ty))
        .collect();
    assert_eq!(
        middle,
        vec![
            "Ljava/lang/IllegalStateException;",
            "Ljava/lang/IllegalArgumentException;"
        ]
    );
    assert_eq!((tries[2].start_address, tries[2].code_unit_count), (2, 1));
}

#[test]
fn placement_allocations_are_disjoint_and_aligned() {
    let container = build_container();
    let layout = container.place().unwrap();
    let bytes = container.to_bytes(&layout).unwrap();

    assert_eq!(bytes.len() as u32, layout.file_size());
    let allocations = layout.allocations();
    assert!(!allocations.is_empty());
    for allocation in allocations {
        assert_eq!(allocation.offset % allocation.alignment, 0);
        assert!(allocation.offset >= layout.data_off());
        assert!(allocation.offset + allocation.size <= layout.file_size());
    }
    for window in allocations.windows(2) {
        assert!(window[0].offset + window[0].size <= window[1].offset);
    }

    // The map offset in the header points at a non-empty map list
    let map_off = LittleEndian::read_u32(&bytes[52..56]);
    assert_eq!(map_off, layout.map_off());
    let entry_count = LittleEndian::read_u32(&bytes[map_off as usize..map_off as usize + 4]);
    assert!(entry_count >= 8);
}
