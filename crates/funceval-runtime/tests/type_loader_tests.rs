// Concurrent type construction through the shared loader

use funceval_config::LimitsConfig;
use funceval_runtime::types::TypeDesc;
use funceval_runtime::{
    ElementType, FuncEvalRequest, RequestEncoder, SignatureBuilder, SignatureResolver,
    SignatureShape, TypeDefinition, TypeHandle, TypeLoader, TypeResolver,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Barrier;

fn prim(element: ElementType) -> TypeDesc {
    TypeDesc::Primitive(element)
}

fn array_of(element: ElementType) -> TypeDesc {
    TypeDesc::Array(Box::new(prim(element)))
}

#[test]
fn test_concurrent_disjoint_batches() {
    let loader = TypeLoader::new();
    let elements = [
        ElementType::I1,
        ElementType::I2,
        ElementType::I4,
        ElementType::I8,
        ElementType::R4,
        ElementType::R8,
    ];
    let barrier = Barrier::new(elements.len());

    let handles: Vec<TypeHandle> = std::thread::scope(|scope| {
        let workers: Vec<_> = elements
            .iter()
            .map(|element| {
                let loader = &loader;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    let handle = loader.resolve_or_construct(&[array_of(*element)]).unwrap()[0];
                    // Published with its layout in one step.
                    assert!(loader.layout(handle).is_some());
                    handle
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let distinct: HashSet<_> = handles.iter().copied().collect();
    assert_eq!(distinct.len(), elements.len());
    assert_eq!(loader.constructed_count(), elements.len());
    for (element, handle) in elements.iter().zip(&handles) {
        assert_eq!(loader.try_resolve(&array_of(*element)), Some(*handle));
    }
}

#[test]
fn test_concurrent_same_instantiation_builds_once() {
    let loader = TypeLoader::new();
    let pair = loader
        .define(TypeDefinition::generic_structure(
            "Pair",
            2,
            vec![
                TypeDesc::Variable {
                    index: 0,
                    method: false,
                },
                TypeDesc::Variable {
                    index: 1,
                    method: false,
                },
            ],
        ))
        .unwrap();
    let desc = TypeDesc::Instantiation {
        definition: Box::new(TypeDesc::Handle(pair)),
        arguments: vec![prim(ElementType::I4), prim(ElementType::R8)],
    };
    let barrier = Barrier::new(8);

    let handles: Vec<TypeHandle> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let loader = &loader;
                let barrier = &barrier;
                let desc = desc.clone();
                scope.spawn(move || {
                    barrier.wait();
                    loader.resolve_or_construct(&[desc]).unwrap()[0]
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(handles.iter().all(|h| *h == handles[0]));
    assert_eq!(loader.constructed_count(), 1);
    assert_eq!(loader.layout(handles[0]).unwrap().size, 16);
}

#[test]
fn test_resolution_is_idempotent() {
    let loader = TypeLoader::new();
    let batch = vec![
        array_of(ElementType::String),
        TypeDesc::Pointer(Box::new(prim(ElementType::U2))),
        prim(ElementType::Boolean),
    ];

    let first = loader.resolve_or_construct(&batch).unwrap();
    let constructed = loader.constructed_count();
    let second = loader.resolve_or_construct(&batch).unwrap();

    assert_eq!(first, second);
    assert_eq!(loader.constructed_count(), constructed);
    assert_eq!(first[2], loader.primitive(ElementType::Boolean));
}

#[test]
fn test_same_signature_blob_resolves_to_same_handles() {
    let loader = TypeLoader::new();
    let pair = loader
        .define(TypeDefinition::generic_structure(
            "Pair",
            2,
            vec![
                TypeDesc::Variable {
                    index: 0,
                    method: false,
                },
                TypeDesc::Variable {
                    index: 1,
                    method: false,
                },
            ],
        ))
        .unwrap();
    let shape = SignatureShape {
        return_type: TypeDesc::Instantiation {
            definition: Box::new(TypeDesc::Handle(pair)),
            arguments: vec![prim(ElementType::I4), prim(ElementType::I8)],
        },
        receiver: None,
        parameters: vec![
            array_of(ElementType::U2),
            TypeDesc::ByRef(Box::new(array_of(ElementType::U2))),
        ],
    };
    let (signature, references) = SignatureBuilder::encode(&shape);
    let mut encoder = RequestEncoder::new()
        .signature(signature)
        .parameter(vec![0; 8])
        .parameter(vec![0; 8]);
    for reference in references {
        encoder = encoder.type_reference(reference);
    }
    let request = FuncEvalRequest::decode(&encoder.encode(), &LimitsConfig::default()).unwrap();

    let resolver = SignatureResolver::new(&loader);
    let first = resolver.resolve(&request).unwrap();
    let constructed = loader.constructed_count();
    let second = resolver.resolve(&request).unwrap();

    // Pair<i32, i64> and u16[] were built once, then found directly.
    assert_eq!(constructed, 2);
    assert_eq!(loader.constructed_count(), constructed);
    assert_eq!(first.handles(), second.handles());
    assert_eq!(first, second);
    assert!(second.arguments()[1].is_by_ref);
}

#[test]
fn test_failed_batch_leaves_loader_usable() {
    let loader = TypeLoader::new();
    let bogus = TypeDesc::Instantiation {
        definition: Box::new(TypeDesc::Handle(TypeHandle::from_raw(0xdead))),
        arguments: vec![prim(ElementType::I4)],
    };

    assert!(loader
        .resolve_or_construct(&[array_of(ElementType::I4), bogus.clone()])
        .is_err());
    assert_eq!(loader.try_resolve(&array_of(ElementType::I4)), None);

    let handle = loader
        .resolve_or_construct(&[array_of(ElementType::I4)])
        .unwrap()[0];
    assert_eq!(loader.type_name(handle).as_deref(), Some("i32[]"));
}
