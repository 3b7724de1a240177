// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Optional latency histograms for the three engines, wired up the same
//! way `kustos::metrics::KustosMetrics` hooks into an OpenTelemetry
//! `MeterProvider`.

use opentelemetry::metrics::{Histogram, Meter};
use opentelemetry_sdk::metrics::{
    new_view, Aggregation, Instrument, MeterProviderBuilder, MetricError, Stream,
};

const HAS_RIGHTS_EXEC_TIME: &str = "iam_core.has_rights_execution_time_seconds";
const CHECKIN_EXEC_TIME: &str = "iam_core.token_checkin_execution_time_seconds";

pub struct CoreMetrics {
    pub has_rights_execution_time: Histogram<f64>,
    pub checkin_execution_time: Histogram<f64>,
}

impl CoreMetrics {
    pub fn append_views(
        provider_builder: MeterProviderBuilder,
    ) -> Result<MeterProviderBuilder, MetricError> {
        Ok(provider_builder
            .with_view(new_view(
                Instrument::new().name(HAS_RIGHTS_EXEC_TIME),
                Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![0.001, 0.005, 0.01, 0.05, 0.1],
                    record_min_max: false,
                }),
            )?)
            .with_view(new_view(
                Instrument::new().name(CHECKIN_EXEC_TIME),
                Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![0.001, 0.005, 0.01, 0.05, 0.1],
                    record_min_max: false,
                }),
            )?))
    }

    pub fn new(meter: &Meter) -> Self {
        Self {
            has_rights_execution_time: meter
                .f64_histogram(HAS_RIGHTS_EXEC_TIME)
                .with_description("Execution time of AccessPolicy::has_rights")
                .with_unit("seconds")
                .build(),
            checkin_execution_time: meter
                .f64_histogram(CHECKIN_EXEC_TIME)
                .with_description("Execution time of TokenManager::checkin")
                .with_unit("seconds")
                .build(),
        }
    }
}
