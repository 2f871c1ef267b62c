use rouille::Request;
use std::collections::HashMap;
use std::io::Read;
use url::form_urlencoded;

/// Collects request parameters from the body and the query string into one
/// map. Body parameters win over query parameters of the same name.
pub struct RequestParameters {
    values: HashMap<String, String>,
}

impl RequestParameters {
    pub fn new(req: &Request) -> Self {
        let mut values = HashMap::new();
        RequestParameters::decode(req, &mut values);
        RequestParameters { values }
    }

    fn decode(req: &Request, map: &mut HashMap<String, String>) {
        let content_type_raw: &str = req.header("Content-Type").unwrap_or("nothing");
        let content_type_arr: Vec<&str> = content_type_raw.split(';').collect();
        if content_type_arr.is_empty() {
            return;
        }
        let content_type = content_type_arr[0].trim();

        if req.method() == "POST" {
            match content_type {
                "application/x-www-form-urlencoded" => {
                    RequestParameters::decode_url_encoded(req, map);
                }
                "application/json" => {
                    RequestParameters::decode_json(req, map);
                }
                "nothing" => {
                    // ignore body
                }
                _ => {
                    error!("unknown content type: {}", content_type);
                }
            }
        }

        RequestParameters::decode_url_query(req, map);
    }

    fn decode_url_query(req: &Request, map: &mut HashMap<String, String>) {
        let iter = form_urlencoded::parse(req.raw_query_string().as_bytes());
        for (key, val) in iter {
            trace!("query '{}' => '{}'", key, val);
            let key = String::from(key);
            if !map.contains_key(&key) {
                map.insert(key, String::from(val));
            }
        }
    }

    fn decode_url_encoded(req: &Request, map: &mut HashMap<String, String>) {
        let data = req.data();
        if let Some(mut data) = data {
            let mut buf = Vec::new();
            match data.read_to_end(&mut buf) {
                Ok(_) => {
                    let iter = form_urlencoded::parse(&buf);
                    for (key, val) in iter {
                        trace!("application/x-www-form-urlencoded '{}' => '{}'", key, val);
                        let key = String::from(key);
                        if !map.contains_key(&key) {
                            map.insert(key, String::from(val));
                        }
                    }
                }
                Err(_) => {
                    error!("unable to read urlencoded body");
                }
            }
        }
    }

    fn decode_json(req: &Request, map: &mut HashMap<String, String>) {
        let data = req.data();
        if let Some(mut data) = data {
            let mut buf = Vec::new();
            match data.read_to_end(&mut buf) {
                Ok(_) => {
                    let v: Result<HashMap<String, serde_json::Value>, serde_json::error::Error> =
                        serde_json::from_slice(&buf);
                    match v {
                        Err(_) => {
                            error!("unable to decode json body");
                        }
                        Ok(v) => {
                            for (key, value) in v {
                                trace!("application/json {} => {}", key, value);
                                if !map.contains_key(&key) {
                                    if let Some(value) = value.as_str() {
                                        map.insert(key, String::from(value));
                                    } else if let Some(value) = value.as_u64() {
                                        map.insert(key, value.to_string());
                                    } else if let Some(value) = value.as_i64() {
                                        map.insert(key, value.to_string());
                                    } else if let Some(value) = value.as_f64() {
                                        map.insert(key, value.to_string());
                                    } else if let Some(value) = value.as_bool() {
                                        map.insert(key, value.to_string());
                                    } else {
                                        error!("unsupported value type in json");
                                    }
                                }
                            }
                        }
                    }
                }
                Err(_) => {
                    error!("unable to read json body");
                }
            }
        }
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        let v = self.values.get(name);
        if let Some(v) = v {
            return Some(String::from(v));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_wins_over_query() {
        let req = Request::fake_http(
            "POST",
            "/json/streams/test?streamUrl=http%3A%2F%2Fquery.example",
            vec![(
                "Content-Type".to_owned(),
                "application/json".to_owned(),
            )],
            br#"{"streamUrl":"http://body.example/live"}"#.to_vec(),
        );
        let params = RequestParameters::new(&req);
        assert_eq!(
            params.get_string("streamUrl").as_deref(),
            Some("http://body.example/live")
        );
    }

    #[test]
    fn urlencoded_body_is_decoded() {
        let req = Request::fake_http(
            "POST",
            "/json/streams/test",
            vec![(
                "Content-Type".to_owned(),
                "application/x-www-form-urlencoded".to_owned(),
            )],
            b"streamUrl=http%3A%2F%2Fstream.example%2Flive".to_vec(),
        );
        let params = RequestParameters::new(&req);
        assert_eq!(
            params.get_string("streamUrl").as_deref(),
            Some("http://stream.example/live")
        );
    }

    #[test]
    fn garbage_json_yields_no_parameters() {
        let req = Request::fake_http(
            "POST",
            "/json/streams/test",
            vec![(
                "Content-Type".to_owned(),
                "application/json".to_owned(),
            )],
            b"{not json".to_vec(),
        );
        let params = RequestParameters::new(&req);
        assert!(params.get_string("streamUrl").is_none());
    }
}
