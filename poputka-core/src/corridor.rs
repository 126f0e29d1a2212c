use serde::Deserialize;

/// Default stop order, south-west to Krasnodar
pub const DEFAULT_STOPS: [&str; 9] = [
    "Сказочный край",
    "Живой дом",
    "Здравое",
    "Григорьевская",
    "Смоленская",
    "Афипский",
    "Энем",
    "Яблоновский",
    "Краснодар",
];

/// Fixed, ordered list of stops. Travel direction is the order of indices.
#[derive(Debug, Clone)]
pub struct Corridor {
    stops: Vec<String>,
    lowered: Vec<String>,
}

impl Corridor {
    pub fn new<I, S>(stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stops: Vec<String> = stops.into_iter().map(Into::into).collect();
        let lowered = stops.iter().map(|s| s.to_lowercase()).collect();
        Self { stops, lowered }
    }

    pub fn stops(&self) -> &[String] {
        &self.stops
    }

    /// Resolves free-text place to a stop index.
    ///
    /// A stop matches when its name is contained in the place text, ignoring
    /// case. Several stops may match ("Энем" inside "Энем-2 Яблоновский"); the
    /// longest stop name wins and equal lengths fall back to corridor order.
    /// This is a heuristic: the text is not tokenized, so a place mentioning
    /// two stops resolves to whichever name is longer.
    pub fn index_of(&self, place: &str) -> Option<usize> {
        let place = place.to_lowercase();
        let mut best: Option<(usize, usize)> = None;

        for (idx, stop) in self.lowered.iter().enumerate() {
            if stop.is_empty() || !place.contains(stop.as_str()) {
                continue;
            }
            let len = stop.chars().count();
            match best {
                Some((_, best_len)) if best_len >= len => {}
                _ => best = Some((idx, len)),
            }
        }

        best.map(|(idx, _)| idx)
    }

    /// True when the passenger's leg lies inside the driver's leg, in the same
    /// direction.
    ///
    /// If any place is off-corridor the check degrades to text containment:
    /// the passenger's origin must appear in the driver's origin and the
    /// passenger's destination in the driver's destination.
    ///
    /// A zero-length driver leg (origin and destination on the same stop)
    /// counts as backward; it only accepts an identical zero-length passenger
    /// leg.
    pub fn compatible(
        &self,
        driver_origin: &str,
        driver_dest: &str,
        pass_origin: &str,
        pass_dest: &str,
    ) -> bool {
        let resolved = (
            self.index_of(driver_origin),
            self.index_of(driver_dest),
            self.index_of(pass_origin),
            self.index_of(pass_dest),
        );

        let (d_start, d_end, p_start, p_end) = match resolved {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => {
                return driver_origin
                    .to_lowercase()
                    .contains(&pass_origin.to_lowercase())
                    && driver_dest
                        .to_lowercase()
                        .contains(&pass_dest.to_lowercase());
            }
        };

        let driver_forward = d_end > d_start;
        let pass_forward = p_end > p_start;

        if driver_forward != pass_forward {
            return false;
        }

        if driver_forward {
            p_start >= d_start && p_end <= d_end
        } else {
            p_start <= d_start && p_end >= d_end
        }
    }
}

impl Default for Corridor {
    fn default() -> Self {
        Self::new(DEFAULT_STOPS)
    }
}

impl<'de> Deserialize<'de> for Corridor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let stops = Vec::<String>::deserialize(deserializer)?;
        Ok(Corridor::new(stops))
    }
}
