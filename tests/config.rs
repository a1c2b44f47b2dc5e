use spatree::{Device, DeviceFeatures, Error, HashMode, SortMode, SpatialConfig, SpatialTree, TreeMode};

#[test]
fn test_parse_full_config() {
    let json = r#"{
        "max_elements": 5000,
        "group_size": 256,
        "hash_mode": "xyz8",
        "key_bits": 24,
        "sort_mode": "multiple",
        "tree_mode": "multiple"
    }"#;
    let config: SpatialConfig = serde_json::from_str(json).unwrap();
    assert_eq!(
        config,
        SpatialConfig {
            max_elements: 5000,
            group_size: 256,
            hash_mode: HashMode::XYZ8,
            key_bits: 24,
            sort_mode: SortMode::Multiple,
            tree_mode: TreeMode::Multiple,
        }
    );
    assert_eq!(config.validate(&DeviceFeatures::default()), Ok(()));
}

#[test]
fn test_round_trip_through_json() {
    let config = SpatialConfig {
        hash_mode: HashMode::XY16,
        ..SpatialConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"xy16\""));
    assert_eq!(serde_json::from_str::<SpatialConfig>(&json).unwrap(), config);
}

#[test]
fn test_unknown_mode_is_rejected() {
    assert!(serde_json::from_str::<SpatialConfig>(r#"{ "hash_mode": "xyz12" }"#).is_err());
}

#[test]
fn test_stack_from_config() {
    let device = Device::default();
    let config = SpatialConfig {
        max_elements: 300,
        group_size: 32,
        sort_mode: SortMode::Multiple,
        tree_mode: TreeMode::Multiple,
        ..SpatialConfig::default()
    };
    let tree = SpatialTree::from_config(&device, &config).unwrap();
    assert_eq!(tree.mode(), TreeMode::Multiple);
    assert_eq!(tree.group_size(), 32);
    assert_eq!(tree.max_elements(), 300);
    assert_eq!(tree.radix_sort().mode(), SortMode::Multiple);
    assert_eq!(tree.radix_sort().max_elements(), 300);
    assert!(device.allocated() > 0);

    drop(tree);
    assert_eq!(device.allocated(), 0);
}

#[test]
fn test_device_limits_apply() {
    let device = Device::new(DeviceFeatures {
        max_group_size: 64,
        ..DeviceFeatures::default()
    });
    assert_eq!(
        SpatialTree::from_config(&device, &SpatialConfig::default()).unwrap_err(),
        Error::GroupSize { size: 128, limit: 64 }
    );

    let device = Device::new(DeviceFeatures {
        memory_budget: 4096,
        ..DeviceFeatures::default()
    });
    assert!(matches!(
        SpatialTree::from_config(&device, &SpatialConfig::default()),
        Err(Error::Allocation { .. })
    ));
    assert_eq!(device.allocated(), 0);
}
