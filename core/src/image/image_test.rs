use super::*;
use crate::config::PoolConfig;
use crate::table::Identity;

fn sample_dictionary() -> VariableDictionary {
    let mut dict = VariableDictionary::with_sizes(None, 5, 3);
    dict.assign("count", Val::Int(3)).unwrap();
    dict.assign("ratio", Val::Float(0.5)).unwrap();
    dict.assign("greeting", Val::str("hello")).unwrap();
    dict.resolve("pending").unwrap();
    dict.assign_compound("row", &["1", "name"], Val::str("first")).unwrap();
    dict.assign_compound("row", &["2", "name"], Val::str("second")).unwrap();
    dict
}

#[test]
fn dictionary_survives_json_round_trip() {
    let dict = sample_dictionary();
    let json = save_dictionary(&dict).to_json().unwrap();
    let loaded = load_dictionary(&Image::from_json(&json).unwrap()).unwrap();

    loaded.table().validate().unwrap();
    assert_eq!(loaded.len(), dict.len());
    assert_eq!(loaded.value("count"), Some(Val::Int(3)));
    assert_eq!(loaded.value("ratio"), Some(Val::Float(0.5)));
    assert_eq!(loaded.value("greeting"), Some(Val::str("hello")));
    assert!(loaded.lookup("pending").is_some_and(|cell| !cell.has_value()));
    assert_eq!(loaded.compound_value("row", &["2", "name"]), Some(Val::str("second")));
    assert_eq!(loaded.table().stats(), dict.table().stats());
}

#[test]
fn shared_values_stay_shared() {
    let mut dict = VariableDictionary::with_sizes(None, 5, 3);
    let list = Val::list(vec![Val::Int(1), Val::str("x")]);
    dict.assign("a", list.clone()).unwrap();
    dict.assign("b", list).unwrap();

    let loaded = load_dictionary(&save_dictionary(&dict)).unwrap();
    let a = loaded.value("a").unwrap();
    let b = loaded.value("b").unwrap();
    assert!(a.is_same(&b));
    assert_eq!(a, Val::list(vec![Val::Int(1), Val::str("x")]));
}

#[test]
fn object_cycles_and_stored_hashes_survive() {
    let config = PoolConfig::default();
    let obj = Val::object("Account");
    let class_scope = Val::str("Account");
    let scope = obj
        .as_object()
        .unwrap()
        .variables()
        .get_or_create(&class_scope, &config);
    scope.with(|dict| {
        dict.assign("owner", Val::str("ada")).unwrap();
        dict.assign("self", obj.clone()).unwrap();
    });

    let image = save_values(std::slice::from_ref(&obj));
    let loaded = load_values(&Image::from_json(&image.to_json().unwrap()).unwrap()).unwrap();
    let restored = &loaded[0];
    assert_eq!(restored.identity_hash(), obj.identity_hash());

    let restored_obj = restored.as_object().unwrap();
    assert_eq!(restored_obj.class(), "Account");
    let dicts = restored_obj.variables().dictionaries();
    assert_eq!(dicts.len(), 1);
    let scope = dicts[0].scope().unwrap();
    assert_eq!(scope, &class_scope);
    let found = restored_obj.variables().find(scope).unwrap();
    found.with(|dict| {
        assert_eq!(dict.value("owner"), Some(Val::str("ada")));
        assert!(dict.value("self").unwrap().is_same(restored));
    });
}

#[test]
fn identity_table_is_restored_without_rehash() {
    let keys: Vec<Val> = (0..12).map(|i| Val::object(&format!("K{}", i))).collect();
    let mut table: HashTable<Identity, Val> = HashTable::with_primary_size(3);
    for (i, key) in keys.iter().enumerate() {
        table.insert(key.clone(), Val::Int(i as i64)).unwrap();
    }

    let mut writer = ImageWriter::new();
    let flat = table.flatten(&mut writer);
    let image = writer.finish();
    let mut reader = ImageReader::new(&image).unwrap();
    let restored: HashTable<Identity, Val> = HashTable::restore(&flat, &mut reader).unwrap();

    restored.validate().unwrap();
    assert_eq!(restored.stats(), table.stats());
    for (slot, (key, value)) in restored.iter().zip(table.iter()) {
        assert_eq!(slot.0.identity_hash(), key.identity_hash());
        assert_eq!(slot.1, value);
    }
}

#[test]
fn stem_defaults_survive() {
    let mut dict = VariableDictionary::with_sizes(None, 5, 3);
    dict.assign_stem("grid", Val::Int(0)).unwrap();
    dict.assign_compound("grid", &["4"], Val::Int(9)).unwrap();

    let loaded = load_dictionary(&save_dictionary(&dict)).unwrap();
    assert_eq!(loaded.compound_value("grid", &["4"]), Some(Val::Int(9)));
    assert_eq!(loaded.compound_value("grid", &["5"]), Some(Val::Int(0)));
}

#[test]
fn file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.json");
    save_dictionary(&sample_dictionary()).write_to(&path).unwrap();
    let loaded = load_dictionary(&Image::read_from(&path).unwrap()).unwrap();
    assert_eq!(loaded.value("count"), Some(Val::Int(3)));
}

#[test]
fn rejects_bad_images() {
    let mut image = save_dictionary(&sample_dictionary());
    image.version = IMAGE_VERSION + 1;
    assert!(ImageReader::new(&image).is_err());
    assert!(Image::from_json(&image.to_json().unwrap()).is_err());

    let empty = Image {
        version: IMAGE_VERSION,
        objects: Vec::new(),
        roots: Vec::new(),
    };
    assert!(load_dictionary(&empty).is_err());

    let dangling = Image {
        version: IMAGE_VERSION,
        objects: vec![ImageObject::Cell {
            name: "x".to_string(),
            value: Some(RelocatedRef(7)),
        }],
        roots: Vec::new(),
    };
    assert!(ImageReader::new(&dangling).is_err());
}

#[test]
fn non_finite_floats_survive_json() {
    let mut dict = VariableDictionary::with_sizes(None, 5, 3);
    dict.assign("up", Val::Float(f64::INFINITY)).unwrap();
    dict.assign("down", Val::Float(f64::NEG_INFINITY)).unwrap();
    dict.assign("nan", Val::Float(f64::NAN)).unwrap();
    dict.assign("zero", Val::Float(-0.0)).unwrap();

    let json = save_dictionary(&dict).to_json().unwrap();
    let loaded = load_dictionary(&Image::from_json(&json).unwrap()).unwrap();
    let bits = |name: &str| match loaded.value(name) {
        Some(Val::Float(value)) => value.to_bits(),
        other => panic!("{} is not a float: {:?}", name, other),
    };
    assert_eq!(bits("up"), f64::INFINITY.to_bits());
    assert_eq!(bits("down"), f64::NEG_INFINITY.to_bits());
    assert_eq!(bits("nan"), f64::NAN.to_bits());
    assert_eq!(bits("zero"), (-0.0f64).to_bits());
}

#[test]
fn oversized_stem_table_is_an_error() {
    let image = save_dictionary(&sample_dictionary());
    let mut oversized = image.clone();
    let mut stems = 0;
    for object in &mut oversized.objects {
        if let ImageObject::Stem { tails, .. } = object {
            tails.primary_size = usize::MAX / 2;
            stems += 1;
        }
    }
    assert_eq!(stems, 1);
    assert!(load_dictionary(&oversized).is_err());

    let mut overflowing = image;
    for object in &mut overflowing.objects {
        if let ImageObject::Dictionary { table, .. } = object {
            table.primary_size = usize::MAX;
        }
    }
    assert!(load_dictionary(&overflowing).is_err());
}
