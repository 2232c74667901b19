use std::fs;
use std::path::Path;

use resale_cache::cache::CacheKey;
use resale_cache::config::{NullMonthPolicy, PipelineConfig};
use resale_cache::table::{Measure, MeasureSet, StatColumn, Statistic};
use resale_cache::{
    run_build, Category, CategoryChoice, DashboardContext, DateRange, DerivedCache, Dimension,
    FilterState, PipelineError, RegionSet,
};
use tempfile::tempdir;

const EARLY: &str = "\
month,town,flat_type,block,street_name,storey_range,floor_area_sqm,flat_model,lease_commence_date,resale_price
2012-03,ANG MO KIO,3 ROOM,172,ANG MO KIO AVE 4,01 TO 03,50,New Generation,1986,250000
2012-03,ANG MO KIO,3 ROOM,510,ANG MO KIO AVE 8,10 TO 12,60,New Generation,1980,300000
2012-04,KALLANG/WHAMPOA,4 ROOM,11,JLN BATU,04 TO 06,80,Model A,1978,400000
";

const LATE: &str = "\
month,town,flat_type,block,street_name,storey_range,floor_area_sqm,flat_model,lease_commence_date,remaining_lease,resale_price
2017-01,ANG MO KIO,3 ROOM,406,ANG MO KIO AVE 10,07 TO 09,68,Improved,1979,61 years 04 months,340000
2017-01,BEDOK,4 ROOM,10,BEDOK STH AVE 1,01 TO 03,90,Model A,1980,62 years 01 month,not a number
";

const MIXED_STOREYS: &str = "\
month,town,flat_type,block,street_name,storey_range,floor_area_sqm,flat_model,lease_commence_date,resale_price
2012-03,BEDOK,3 ROOM,1,BEDOK NTH RD,01 TO 03,100,Improved,1980,100000
2012-03,BEDOK,3 ROOM,2,BEDOK NTH RD,01 TO 03,100,Improved,1980,100000
2012-03,BEDOK,3 ROOM,3,BEDOK NTH RD,01 TO 03,100,Improved,1980,100000
2012-03,BEDOK,3 ROOM,4,BEDOK NTH RD,10 TO 12,100,Improved,1980,1000000
2012-03,BEDOK,4 ROOM,5,BEDOK NTH RD,04 TO 06,100,Model A,1980,500000
";

const BOUNDARIES: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"PLN_AREA_N": "ANG MO KIO"}, "geometry": null},
    {"type": "Feature", "properties": {"PLN_AREA_N": "BEDOK"}, "geometry": null},
    {"type": "Feature", "properties": {"PLN_AREA_N": "PUNGGOL"}, "geometry": null}
  ]
}"#;

fn write_inputs(dir: &Path) -> PipelineConfig {
    fs::write(dir.join("early.csv"), EARLY).unwrap();
    fs::write(dir.join("late.csv"), LATE).unwrap();
    fs::write(dir.join("boundaries.geojson"), BOUNDARIES).unwrap();
    let config = PipelineConfig {
        raw_files: vec!["early.csv".into(), "late.csv".into()],
        reference: "boundaries.geojson".into(),
        cache_dir: "processed".into(),
        null_months: NullMonthPolicy::Exclude,
        ..PipelineConfig::default()
    };
    config.resolve_paths(dir)
}

fn stat(measure: Measure, statistic: Statistic) -> StatColumn {
    StatColumn::new(measure, statistic)
}

#[test]
fn builds_the_whole_tree() {
    let dir = tempdir().unwrap();
    let config = write_inputs(dir.path());
    let report = run_build(&config).unwrap();
    assert_eq!(report.records, 5);
    assert_eq!(report.towns, 3);
    assert_eq!(report.category_values[&Category::StoreyRange], 4);

    let root = &config.cache_dir;
    for path in [
        "overview_by_month.csv",
        "overview_by_month_and_town.csv",
        "detailed_overview_by_month.csv",
        "detailed_overview_by_month_and_town.csv",
        "flat_type_data/3_ROOM_overview.csv",
        "storey_range_data/very_low_overview.csv",
        "towns/KALLANG-WHAMPOA/KALLANG-WHAMPOA_overview.csv",
        "towns/ANG_MO_KIO/ANG_MO_KIO_storey_range_data/high_overview.csv",
    ] {
        assert!(root.join(path).is_file(), "missing {path}");
    }
    assert!(!dir.path().join("processed.staging").exists());
    assert!(root.join(".resale_cache").is_file());

    let cache = DerivedCache::new(root);
    let table = cache
        .load(&CacheKey::TownOverview {
            town: "ANG MO KIO".into(),
        })
        .unwrap();
    assert_eq!(table.len(), 2);
    let row = &table.rows()[0];
    assert_eq!(table.key(row, Dimension::Month), Some("2012-03"));
    let median = table.column_position(stat(Measure::ResalePrice, Statistic::Median)).unwrap();
    let min = table.column_position(stat(Measure::ResalePrice, Statistic::Min)).unwrap();
    let max = table.column_position(stat(Measure::ResalePrice, Statistic::Max)).unwrap();
    assert_eq!(row.values[median], Some(275000.0));
    assert_eq!(row.values[min], Some(250000.0));
    assert_eq!(row.values[max], Some(300000.0));

    // BEDOK's only sale has no usable price
    let bedok = cache
        .load(&CacheKey::TownOverview {
            town: "BEDOK".into(),
        })
        .unwrap();
    assert_eq!(bedok.rows()[0].values[median], None);
}

#[test]
fn rebuild_replaces_previous_tree() {
    let dir = tempdir().unwrap();
    let config = write_inputs(dir.path());
    run_build(&config).unwrap();
    let stale = config.cache_dir.join("towns/STALE");
    fs::create_dir_all(&stale).unwrap();

    run_build(&config).unwrap();
    assert!(!stale.exists());
    assert!(config.cache_dir.join("overview_by_month.csv").is_file());
}

#[test]
fn unbuilt_keys_are_not_found_and_corrupt_files_are_not() {
    let dir = tempdir().unwrap();
    let cache = DerivedCache::new(dir.path().join("empty"));
    let err = cache.load(&CacheKey::OverviewByMonth).unwrap_err();
    assert!(err.is_not_found());

    let root = dir.path().join("corrupt");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("overview_by_month.csv"), "month,resale_price_median\n2012-03,abc\n").unwrap();
    let err = DerivedCache::new(&root).load(&CacheKey::OverviewByMonth).unwrap_err();
    assert!(matches!(err, PipelineError::Parse { .. }));

    fs::write(root.join("overview_by_month.csv"), "town,resale_price_median\nBEDOK,1\n").unwrap();
    let err = DerivedCache::new(&root).load(&CacheKey::OverviewByMonth).unwrap_err();
    assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
}

#[test]
fn dashboard_queries_read_the_cache() {
    let dir = tempdir().unwrap();
    let config = write_inputs(dir.path());
    run_build(&config).unwrap();
    let context = DashboardContext::from_config(&config).unwrap();
    assert_eq!(context.regions(), &RegionSet::new(["ANG MO KIO", "BEDOK", "PUNGGOL"]));

    let all_time = FilterState::new(DateRange::parse("1990-01", "2023-12"));
    let series = context.query(&all_time, None);
    assert_eq!(series.distinct_values(Dimension::Month), ["2012-03", "2012-04", "2017-01"]);

    let only_2012 = FilterState::from_widgets("2012-01", "2012-12", &[(Category::FlatType, "3 ROOM")]);
    let series = context.query(&only_2012, Some("ANG MO KIO"));
    assert_eq!(series.len(), 1);
    assert_eq!(series.dimensions(), [Dimension::Town, Dimension::FlatType, Dimension::Month]);

    let two = only_2012
        .clone()
        .with_category(Category::StoreyRange, CategoryChoice::parse("high"));
    let detailed = context.query(&two, Some("ANG MO KIO"));
    assert_eq!(detailed.len(), 1);
    assert_eq!(detailed.key(&detailed.rows()[0], Dimension::StoreyRange), Some("high"));

    let missing = FilterState::from_widgets("2012-01", "2012-12", &[(Category::FlatType, "1 ROOM")]);
    let empty = context.query(&missing, None);
    assert!(empty.is_empty());
    assert_eq!(empty.columns(), MeasureSet::PricePerSqm.columns());
}

#[test]
fn map_view_covers_every_region() {
    let dir = tempdir().unwrap();
    let config = write_inputs(dir.path());
    run_build(&config).unwrap();
    let context = DashboardContext::from_config(&config).unwrap();

    let filter = FilterState::new(DateRange::parse("2012-01", "2012-12"));
    let map = context.map_view(&filter);
    assert_eq!(map.distinct_values(Dimension::Town), ["ANG MO KIO", "BEDOK", "PUNGGOL"]);
    let median = map.column_position(stat(Measure::ResalePrice, Statistic::Median)).unwrap();
    assert_eq!(map.rows()[0].values[median], Some(275000.0));
    assert_eq!(map.rows()[2].values[median], Some(0.0));
}

#[test]
fn map_view_with_one_category_uses_monthly_medians() {
    let dir = tempdir().unwrap();
    let mut config = write_inputs(dir.path());
    fs::write(dir.path().join("mixed.csv"), MIXED_STOREYS).unwrap();
    config.raw_files = vec![dir.path().join("mixed.csv")];
    run_build(&config).unwrap();
    let context = DashboardContext::from_config(&config).unwrap();

    let three_room = FilterState::from_widgets("2012-01", "2012-12", &[(Category::FlatType, "3 ROOM")]);
    let map = context.map_view(&three_room);
    assert_eq!(map.distinct_values(Dimension::Town), ["ANG MO KIO", "BEDOK", "PUNGGOL"]);
    let median = map.column_position(stat(Measure::ResalePrice, Statistic::Median)).unwrap();
    assert_eq!(map.rows()[0].values[median], Some(0.0));
    assert_eq!(map.rows()[1].values[median], Some(100000.0));

    let high = FilterState::from_widgets("2012-01", "2012-12", &[(Category::StoreyRange, "high")]);
    let map = context.map_view(&high);
    assert_eq!(map.rows()[1].values[median], Some(1000000.0));

    let both = three_room.with_category(Category::StoreyRange, CategoryChoice::parse("very low"));
    let map = context.map_view(&both);
    assert_eq!(map.rows()[1].values[median], Some(100000.0));
}
