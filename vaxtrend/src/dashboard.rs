//! Chart payloads and the static dashboard page.
//!
//! Each chart is a plotly figure object (`data` + `layout`) built with
//! `serde_json`; the page embeds them as JSON and draws them in the browser
//! with plotly.js from the CDN. There is no server and no programmatic API:
//! the page is a plain file.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use itertools::Itertools;
use polars::prelude::DataFrame;
use serde_json::{json, Value};

use crate::aggregate::{self, MonthlyBucket};
use crate::cluster::{self, VaccineClusters};
use crate::forecast::{self, ForecastPoint, GroupForecast, LocationForecast, TrendStrategy};
use crate::COL;

const PAGE_TITLE: &str = "RecifeVax - Pessoas Vacinadas contra Covid-19 em Recife";
const TOP_N: usize = 10;

/// One rendered chart: a target element and its plotly figure.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub element_id: String,
    pub figure: Value,
}

impl Chart {
    fn new(element_id: &str, data: Value, layout: Value) -> Self {
        Self {
            element_id: element_id.to_string(),
            figure: json!({ "data": data, "layout": layout }),
        }
    }
}

fn month_label(bucket: &MonthlyBucket) -> String {
    format!("{:04}-{:02}", bucket.year, bucket.month)
}

fn base_layout(title: &str) -> Value {
    json!({
        "title": { "text": title },
        "template": "plotly_white",
        "height": 650,
    })
}

/// Observed monthly totals with the dotted forecast overlay.
pub fn monthly_chart(buckets: &[MonthlyBucket], points: &[ForecastPoint]) -> Chart {
    let observed = json!({
        "type": "scatter",
        "mode": "lines+markers",
        "name": "Observado",
        "x": buckets.iter().map(month_label).collect::<Vec<_>>(),
        "y": buckets.iter().map(|b| b.total).collect::<Vec<_>>(),
        "line": { "color": "#1f77b4" },
    });
    let forecast = json!({
        "type": "scatter",
        "mode": "lines+markers",
        "name": "Predição",
        "x": points.iter().map(|p| p.label()).collect::<Vec<_>>(),
        "y": points.iter().map(|p| p.predicted).collect::<Vec<_>>(),
        "line": { "dash": "dot", "color": "red" },
    });
    Chart::new(
        "chart-monthly",
        json!([observed, forecast]),
        base_layout("Vacinação Mensal (com previsão)"),
    )
}

fn bar_chart(element_id: &str, title: &str, counts: &[aggregate::CategoryCount]) -> Chart {
    let trace = json!({
        "type": "bar",
        "x": counts.iter().map(|c| c.value.as_str()).collect::<Vec<_>>(),
        "y": counts.iter().map(|c| c.total).collect::<Vec<_>>(),
        "text": counts.iter().map(|c| c.total).collect::<Vec<_>>(),
        "textposition": "outside",
    });
    let mut layout = base_layout(title);
    layout["xaxis"] = json!({ "tickangle": -45 });
    Chart::new(element_id, json!([trace]), layout)
}

/// Doses per vaccine product.
pub fn vaccine_chart(counts: &[aggregate::CategoryCount]) -> Chart {
    bar_chart(
        "chart-vaccines",
        "Distribuição por Tipo de Vacina",
        counts,
    )
}

/// Sex distribution as a pie.
pub fn sex_chart(counts: &[aggregate::CategoryCount]) -> Chart {
    let trace = json!({
        "type": "pie",
        "labels": counts.iter().map(|c| c.value.as_str()).collect::<Vec<_>>(),
        "values": counts.iter().map(|c| c.total).collect::<Vec<_>>(),
        "textinfo": "percent+label",
    });
    Chart::new(
        "chart-sex",
        json!([trace]),
        base_layout("Distribuição por Sexo"),
    )
}

/// Top priority groups.
pub fn group_chart(counts: &[aggregate::CategoryCount]) -> Chart {
    bar_chart("chart-groups", "Top 10 Grupos Prioritários", counts)
}

/// Top vaccination sites.
pub fn location_chart(counts: &[aggregate::CategoryCount]) -> Chart {
    bar_chart("chart-locations", "Top 10 Locais de Vacinação", counts)
}

/// Lollipop of the per-group apportioned forecast, ascending.
pub fn group_forecast_chart(groups: &[GroupForecast]) -> Chart {
    let sorted: Vec<&GroupForecast> = groups
        .iter()
        .sorted_by(|a, b| {
            a.projected
                .partial_cmp(&b.projected)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .collect();
    let stems = json!({
        "type": "scatter",
        "mode": "lines",
        "x": sorted.iter().map(|g| g.projected).collect::<Vec<_>>(),
        "y": sorted.iter().map(|g| g.group.as_str()).collect::<Vec<_>>(),
        "line": { "color": "lightgray", "width": 2 },
        "showlegend": false,
    });
    let markers = json!({
        "type": "scatter",
        "mode": "markers+text",
        "name": "Previsão",
        "x": sorted.iter().map(|g| g.projected).collect::<Vec<_>>(),
        "y": sorted.iter().map(|g| g.group.as_str()).collect::<Vec<_>>(),
        "text": sorted.iter().map(|g| g.projected.round()).collect::<Vec<_>>(),
        "textposition": "middle right",
        "marker": { "color": "#1f77b4", "size": 12 },
    });
    let mut layout = base_layout("Predição de Vacinação por Grupo Prioritário");
    layout["height"] = json!(700);
    Chart::new("chart-group-forecast", json!([stems, markers]), layout)
}

/// Heatmap of the per-site 3-month projections.
pub fn location_forecast_chart(forecasts: &[LocationForecast]) -> Chart {
    let months: Vec<String> = forecasts
        .iter()
        .map(LocationForecast::label)
        .unique()
        .collect();
    let locations: Vec<&str> = forecasts
        .iter()
        .map(|f| f.location.as_str())
        .unique()
        .collect();
    let z: Vec<Vec<Option<f64>>> = locations
        .iter()
        .map(|location| {
            months
                .iter()
                .map(|month| {
                    forecasts
                        .iter()
                        .find(|f| f.location == *location && &f.label() == month)
                        .map(|f| f.predicted)
                })
                .collect()
        })
        .collect();
    let trace = json!({
        "type": "heatmap",
        "x": months,
        "y": locations,
        "z": z,
        "colorscale": "Viridis",
    });
    let mut layout = base_layout("Predição de Vacinação por Local nos Próximos 3 Meses");
    layout["height"] = json!(700);
    Chart::new("chart-location-forecast", json!([trace]), layout)
}

/// Grouped bars of the most frequent names per textual-similarity cluster.
pub fn cluster_chart(clusters: &VaccineClusters) -> Chart {
    let traces: Vec<Value> = clusters
        .top_names_per_cluster(TOP_N)
        .into_iter()
        .map(|(label, counts)| {
            json!({
                "type": "bar",
                "name": format!("Cluster {label}"),
                "x": counts.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
                "y": counts.iter().map(|(_, count)| count).collect::<Vec<_>>(),
            })
        })
        .collect();
    let mut layout = base_layout("Vacinas Agrupadas por Similaridade (TF-IDF + KMeans)");
    layout["xaxis"] = json!({ "tickangle": -45 });
    layout["barmode"] = json!("group");
    Chart::new("chart-clusters", json!(traces), layout)
}

/// Assemble the full chart sequence from a cleaned registry frame.
pub fn build_dashboard(df: &DataFrame, horizon: usize) -> Result<Vec<Chart>> {
    let buckets = aggregate::monthly_series(df)?;
    let points = forecast::forecast_monthly(&buckets, horizon, TrendStrategy::Linear)?;
    let groups = forecast::forecast_by_group(df, &points)?;
    let locations = forecast::forecast_by_location(df, horizon)?;
    let clusters = cluster::cluster_vaccine_names(df, cluster::DEFAULT_K, cluster::DEFAULT_SEED)?;

    Ok(vec![
        monthly_chart(&buckets, &points),
        vaccine_chart(&aggregate::category_counts(df, COL::VACINA)?),
        sex_chart(&aggregate::category_counts(df, COL::SEXO)?),
        group_chart(&aggregate::top_categories(df, COL::GRUPO, TOP_N)?),
        location_chart(&aggregate::top_categories(df, COL::LOCAL_VACINACAO, TOP_N)?),
        group_forecast_chart(&groups),
        location_forecast_chart(&locations),
        cluster_chart(&clusters),
    ])
}

/// Render the charts into a single self-contained page.
pub fn render_page(charts: &[Chart]) -> Result<String> {
    let mut divs = String::new();
    let mut scripts = String::new();
    for (index, chart) in charts.iter().enumerate() {
        divs.push_str(&format!(
            "    <div id=\"{}\" class=\"chart\"></div>\n",
            chart.element_id
        ));
        scripts.push_str(&format!(
            "    var fig{index} = {};\n    Plotly.newPlot({}, fig{index}.data, fig{index}.layout, {{responsive: true}});\n",
            serde_json::to_string(&chart.figure)?,
            serde_json::to_string(&chart.element_id)?,
        ));
    }
    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
  <meta charset="utf-8">
  <title>{PAGE_TITLE}</title>
  <script src="https://cdn.plot.ly/plotly-2.32.0.min.js"></script>
  <style>
    body {{ font-family: sans-serif; margin: 0 auto; max-width: 1200px; }}
    h1 {{ padding: 1rem; }}
    .chart {{ width: 100%; margin-bottom: 2rem; }}
  </style>
</head>
<body>
  <h1>💉 {PAGE_TITLE}</h1>
{divs}
  <script>
{scripts}
  </script>
</body>
</html>
"#
    ))
}

/// Build the dashboard from `df` and write the page to `path`.
pub fn write_dashboard<P: AsRef<Path>>(df: &DataFrame, path: P, horizon: usize) -> Result<()> {
    let charts = build_dashboard(df, horizon)?;
    let page = render_page(&charts)?;
    let path = path.as_ref();
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(page.as_bytes())?;
    Ok(())
}
