use comfy_table::{presets::NOTHING, *};

use vaxtrend::aggregate::{CategoryCount, MonthlyBucket};
use vaxtrend::cluster::VaccineClusters;
use vaxtrend::forecast::{ForecastPoint, GroupForecast, LocationForecast};
use vaxtrend::model::EvalMetrics;

fn styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

fn bold_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(label).add_attribute(Attribute::Bold))
        .collect()
}

pub fn display_monthly_series(buckets: &[MonthlyBucket]) {
    let mut table = styled_table();
    table.set_header(bold_header(&["Month", "Total vaccinated"]));
    for bucket in buckets {
        table.add_row(vec![
            format!("{:04}-{:02}", bucket.year, bucket.month),
            bucket.total.to_string(),
        ]);
    }
    println!("\n{}", table);
}

pub fn display_forecast(points: &[ForecastPoint]) {
    let mut table = styled_table();
    table.set_header(bold_header(&["Month", "Predicted total"]));
    for point in points {
        table.add_row(vec![point.label(), format!("{:.1}", point.predicted)]);
    }
    println!("\n{}", table);
}

pub fn display_metrics(metrics: &EvalMetrics) {
    let mut table = styled_table();
    table
        .add_row(vec![
            Cell::new("R²").add_attribute(Attribute::Bold),
            format!("{:.4}", metrics.r2).into(),
        ])
        .add_row(vec![
            Cell::new("RMSE").add_attribute(Attribute::Bold),
            format!("{:.2}", metrics.rmse).into(),
        ])
        .add_row(vec![
            Cell::new("MAE").add_attribute(Attribute::Bold),
            format!("{:.2}", metrics.mae).into(),
        ])
        .add_row(vec![
            Cell::new("Training months").add_attribute(Attribute::Bold),
            metrics.n_train.to_string().into(),
        ])
        .add_row(vec![
            Cell::new("Hold-out months").add_attribute(Attribute::Bold),
            metrics.n_test.to_string().into(),
        ]);
    let column = table.column_mut(0).expect("two columns");
    column.set_cell_alignment(CellAlignment::Right);
    println!("\n{}", table);
}

pub fn display_category_counts(title: &str, counts: &[CategoryCount]) {
    let mut table = styled_table();
    table.set_header(bold_header(&[title, "Total"]));
    for count in counts {
        table.add_row(vec![count.value.clone(), count.total.to_string()]);
    }
    println!("\n{}", table);
}

pub fn display_group_forecasts(groups: &[GroupForecast]) {
    let mut table = styled_table();
    table.set_header(bold_header(&["Priority group", "Historical", "Projected"]));
    for group in groups {
        table.add_row(vec![
            group.group.clone(),
            group.historical_total.to_string(),
            format!("{:.1}", group.projected),
        ]);
    }
    println!("\n{}", table);
}

pub fn display_location_forecasts(forecasts: &[LocationForecast]) {
    let mut table = styled_table();
    table.set_header(bold_header(&["Vaccination site", "Month", "Projected"]));
    for forecast in forecasts {
        table.add_row(vec![
            forecast.location.clone(),
            forecast.label(),
            format!("{:.1}", forecast.predicted),
        ]);
    }
    println!("\n{}", table);
}

pub fn display_clusters(clusters: &VaccineClusters, top_n: usize) {
    let mut table = styled_table();
    table.set_header(bold_header(&["Cluster", "Vaccine name", "Records"]));
    for (label, counts) in clusters.top_names_per_cluster(top_n) {
        for (name, count) in counts {
            table.add_row(vec![label.to_string(), name, count.to_string()]);
        }
    }
    println!("\n{}", table);
}

pub fn display_summary_counts(sections: &[(&str, Vec<CategoryCount>)]) {
    for (title, counts) in sections {
        display_category_counts(title, counts);
    }
}
